use crate::core::classifier::classify;
use crate::core::gateway::{OrgDataGateway, WriteOutcome};
use crate::core::retry::RetryPolicy;
use crate::domain::model::{Category, ChangeEvent, EventTarget, Policy};
use crate::domain::ports::{Clock, GatewayResult, OrgGateway};
use crate::utils::error::GatewayError;
use crate::utils::metrics::SyncMetrics;
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Updated {
        previous: Option<Category>,
        category: Category,
    },
    Unchanged(Category),
    /// Dry-run: the write that would have been sent.
    WouldUpdate {
        previous: Option<Category>,
        category: Category,
    },
    /// The unit no longer exists upstream.
    Vanished,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncFailure {
    #[error("retries exhausted: {0}")]
    Exhausted(GatewayError),

    #[error("fatal gateway failure: {0}")]
    Fatal(GatewayError),
}

impl SyncFailure {
    fn from_gateway(err: GatewayError) -> Self {
        if err.is_fatal() {
            SyncFailure::Fatal(err)
        } else {
            SyncFailure::Exhausted(err)
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncFailure::Fatal(_))
    }
}

pub struct SyncWorker<G: OrgGateway> {
    gateway: OrgDataGateway<G>,
    policy: Arc<Policy>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    metrics: Arc<SyncMetrics>,
    dry_run: bool,
}

impl<G: OrgGateway> SyncWorker<G> {
    pub fn new(
        gateway: Arc<G>,
        policy: Arc<Policy>,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            gateway: OrgDataGateway::new(gateway, policy.classes.clone()),
            policy,
            retry,
            clock,
            metrics,
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }

    /// Fetch, classify and conditionally write back one unit.
    pub async fn sync_unit(&self, uuid: Uuid) -> Result<SyncOutcome, SyncFailure> {
        let result = self
            .retry
            .run(
                self.clock.as_ref(),
                |_| self.metrics.record_retry(),
                || self.attempt(uuid),
            )
            .await;

        match result {
            Ok(outcome) => {
                match outcome {
                    SyncOutcome::Updated { .. } => self.metrics.record_updated(),
                    SyncOutcome::Unchanged(_) | SyncOutcome::WouldUpdate { .. } => {
                        self.metrics.record_unchanged()
                    }
                    SyncOutcome::Vanished => self.metrics.record_skipped(),
                }
                Ok(outcome)
            }
            Err(GatewayError::NotFound(_)) => {
                tracing::info!(%uuid, "No org_unit found, skipping");
                self.metrics.record_skipped();
                Ok(SyncOutcome::Vanished)
            }
            Err(err) => {
                self.metrics.record_failed();
                tracing::error!(%uuid, error = %err, "Org unit sync failed");
                Err(SyncFailure::from_gateway(err))
            }
        }
    }

    async fn attempt(&self, uuid: Uuid) -> GatewayResult<SyncOutcome> {
        let unit = self.gateway.fetch_unit_with_context(uuid).await?;
        tracing::debug!(?unit, "Resolved org unit");

        let category = classify(&unit, &self.policy);
        tracing::info!(%uuid, %category, current = ?unit.current_category, "Classified org unit");

        if self.dry_run {
            if unit.current_category == Some(category) {
                return Ok(SyncOutcome::Unchanged(category));
            }
            tracing::info!(%uuid, %category, "dry-run: would have updated org_unit_hierarchy");
            return Ok(SyncOutcome::WouldUpdate {
                previous: unit.current_category,
                category,
            });
        }

        match self
            .gateway
            .write_category(uuid, category, self.clock.today())
            .await?
        {
            WriteOutcome::Unchanged => Ok(SyncOutcome::Unchanged(category)),
            WriteOutcome::Written { previous } => {
                tracing::info!(%uuid, ?previous, %category, "Updated org_unit_hierarchy");
                Ok(SyncOutcome::Updated { previous, category })
            }
        }
    }

    /// Units affected by a change notification.
    pub async fn affected_units(&self, event: &ChangeEvent) -> Result<Vec<Uuid>, SyncFailure> {
        let target = match event.target() {
            Ok(target) => target,
            Err(_) => return Ok(Vec::new()),
        };
        let lookup = match target {
            EventTarget::Unit(uuid) => return Ok(vec![uuid]),
            EventTarget::Engagement(uuid) => {
                self.retry
                    .run(
                        self.clock.as_ref(),
                        |_| self.metrics.record_retry(),
                        || self.gateway.inner().units_for_engagement(uuid),
                    )
                    .await
            }
            EventTarget::Association(uuid) => {
                self.retry
                    .run(
                        self.clock.as_ref(),
                        |_| self.metrics.record_retry(),
                        || self.gateway.inner().units_for_association(uuid),
                    )
                    .await
            }
        };
        match lookup {
            Ok(units) => Ok(units),
            Err(GatewayError::NotFound(_)) => {
                tracing::debug!(?target, "Related object not found");
                Ok(Vec::new())
            }
            Err(err) => {
                self.metrics.record_failed();
                Err(SyncFailure::from_gateway(err))
            }
        }
    }

    /// Syncs every unit an event touches. A fatal failure stops early;
    /// otherwise the first exhausted failure is reported after all units ran.
    pub async fn handle_event(
        &self,
        event: &ChangeEvent,
    ) -> Result<Vec<(Uuid, SyncOutcome)>, SyncFailure> {
        let units = self.affected_units(event).await?;
        tracing::info!(routing_key = %event.routing_key, units = ?units, "Changes to org units");

        let mut outcomes = Vec::with_capacity(units.len());
        let mut deferred = None;
        for uuid in units {
            match self.sync_unit(uuid).await {
                Ok(outcome) => outcomes.push((uuid, outcome)),
                Err(failure) if failure.is_fatal() => return Err(failure),
                Err(failure) => {
                    deferred.get_or_insert(failure);
                }
            }
        }
        match deferred {
            Some(failure) => Err(failure),
            None => Ok(outcomes),
        }
    }

    /// Recalculates many units with at most `concurrency` in flight.
    pub async fn sync_many(
        &self,
        uuids: Vec<Uuid>,
        concurrency: usize,
    ) -> Vec<(Uuid, Result<SyncOutcome, SyncFailure>)> {
        stream::iter(uuids)
            .map(|uuid| async move { (uuid, self.sync_unit(uuid).await) })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }
}
