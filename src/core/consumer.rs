//! Pulls change notifications off the durable queue and hands them to the
//! [`SyncWorker`], with at most `prefetch` dispatches in flight.
//!
//! ```text
//! Disconnected -> Connecting -> Subscribed <-> Dispatching
//!                                    |
//!                                    v
//!                               ShuttingDown
//! ```
//!
//! A delivery is settled only after its dispatch finished. Malformed events
//! are dropped; failures the broker can retry are requeued.

use crate::core::sync::{SyncFailure, SyncWorker};
use crate::domain::model::ChangeEvent;
use crate::domain::ports::{Broker, Delivery, Disposition, OrgGateway, SubscriptionSpec};
use crate::utils::error::{GatekeeperError, Result};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Topic patterns for changes that can affect a unit's category.
pub const ROUTING_KEYS: [&str; 6] = [
    "org_unit.org_unit.*",
    "org_unit.it.*",
    "org_unit.engagement.*",
    "org_unit.association.*",
    "employee.engagement.*",
    "employee.association.*",
];

pub fn queue_name(prefix: &str) -> String {
    format!("{}_org_unit_hierarchy", prefix)
}

pub fn subscription_spec(exchange: &str, queue_prefix: &str, prefetch: u16) -> SubscriptionSpec {
    SubscriptionSpec {
        exchange: exchange.to_string(),
        queue: queue_name(queue_prefix),
        bindings: ROUTING_KEYS.iter().map(|k| k.to_string()).collect(),
        prefetch: prefetch.max(1),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Connecting,
    Subscribed,
    Dispatching,
    ShuttingDown,
}

pub struct EventConsumer<B: Broker, G: OrgGateway> {
    broker: B,
    worker: Arc<SyncWorker<G>>,
    spec: SubscriptionSpec,
    state: watch::Sender<ConsumerState>,
}

impl<B, G> EventConsumer<B, G>
where
    B: Broker,
    G: OrgGateway + 'static,
{
    pub fn new(broker: B, worker: Arc<SyncWorker<G>>, spec: SubscriptionSpec) -> Self {
        let (state, _) = watch::channel(ConsumerState::Disconnected);
        Self {
            broker,
            worker,
            spec,
            state,
        }
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    fn transition(&self, next: ConsumerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(?previous, ?next, "Consumer state change");
        }
    }

    /// Consumes until `shutdown` flips, the broker closes the stream, or a
    /// dispatch hits a fatal error. Only the shutdown signal ends in `Ok`.
    /// In-flight dispatches always finish.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.transition(ConsumerState::Connecting);
        let mut subscription = match self.broker.subscribe(&self.spec).await {
            Ok(subscription) => subscription,
            Err(err) => {
                self.transition(ConsumerState::Disconnected);
                return Err(err);
            }
        };
        self.transition(ConsumerState::Subscribed);
        tracing::info!(
            queue = %self.spec.queue,
            prefetch = self.spec.prefetch,
            "Listening for org unit changes"
        );

        let capacity = self.spec.prefetch as usize;
        let mut in_flight: JoinSet<Result<()>> = JoinSet::new();

        let result = loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break Ok(()),
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if in_flight.is_empty() {
                        self.transition(ConsumerState::Subscribed);
                    }
                    if let Err(err) = flatten(joined) {
                        break Err(err);
                    }
                }
                next = subscription.next_delivery(), if in_flight.len() < capacity => {
                    match next {
                        Some(Ok(delivery)) => {
                            self.transition(ConsumerState::Dispatching);
                            let worker = self.worker.clone();
                            in_flight.spawn(async move { dispatch(worker.as_ref(), delivery).await });
                        }
                        Some(Err(err)) => break Err(err),
                        None if *shutdown.borrow() => break Ok(()),
                        None => {
                            tracing::error!("Broker closed the subscription");
                            break Err(GatekeeperError::broker("subscription closed"));
                        }
                    }
                }
            }
        };

        self.transition(ConsumerState::ShuttingDown);
        if !in_flight.is_empty() {
            tracing::info!(in_flight = in_flight.len(), "Waiting for in-flight dispatches");
        }
        let mut result = result;
        while let Some(joined) = in_flight.join_next().await {
            if let Err(err) = flatten(joined) {
                tracing::error!(error = %err, "Dispatch failed during shutdown");
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        self.worker.metrics().log_summary();
        result
    }
}

fn flatten(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(err) => {
            // Unsettled deliveries stay unacked until the channel closes.
            tracing::error!(error = %err, "Dispatch task aborted");
            Ok(())
        }
    }
}

/// Processes one delivery and settles it with the broker.
pub async fn dispatch<G: OrgGateway>(worker: &SyncWorker<G>, delivery: Delivery) -> Result<()> {
    worker.metrics().record_received();
    if delivery.redelivered {
        tracing::debug!(routing_key = %delivery.routing_key, "Processing redelivered message");
    }

    let event = match ChangeEvent::parse(&delivery.routing_key, &delivery.body)
        .and_then(|event| event.target().map(|_| event))
    {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(routing_key = %delivery.routing_key, error = %err, "Dropping malformed event");
            worker.metrics().record_dropped();
            return delivery.acker.settle(Disposition::Drop).await;
        }
    };

    let handled = AssertUnwindSafe(worker.handle_event(&event))
        .catch_unwind()
        .await;
    match handled {
        Ok(Ok(_)) => delivery.acker.settle(Disposition::Ack).await,
        Ok(Err(SyncFailure::Exhausted(err))) => {
            tracing::warn!(routing_key = %event.routing_key, error = %err, "Requeueing event");
            delivery.acker.settle(Disposition::Requeue).await
        }
        Ok(Err(SyncFailure::Fatal(err))) => {
            tracing::error!(routing_key = %event.routing_key, error = %err, "Fatal failure, stopping");
            delivery.acker.settle(Disposition::Requeue).await?;
            Err(GatekeeperError::Gateway(err))
        }
        Err(_) => {
            tracing::error!(routing_key = %event.routing_key, "Event handler panicked, requeueing");
            worker.metrics().record_failed();
            delivery.acker.settle(Disposition::Requeue).await
        }
    }
}
