use crate::domain::model::{Category, CategoryClasses, OrgUnit, OrgUnitRecord};
use crate::domain::ports::{GatewayResult, OrgGateway};
use chrono::NaiveDate;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Remote state already held the category; nothing was sent.
    Unchanged,
    Written { previous: Option<Category> },
}

/// Category-level view over an [`OrgGateway`].
pub struct OrgDataGateway<G: OrgGateway> {
    inner: Arc<G>,
    classes: CategoryClasses,
}

impl<G: OrgGateway> OrgDataGateway<G> {
    pub fn new(inner: Arc<G>, classes: CategoryClasses) -> Self {
        Self { inner, classes }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    pub async fn fetch_unit_with_context(&self, uuid: Uuid) -> GatewayResult<OrgUnit> {
        let record = self.inner.fetch_unit(uuid).await?;
        tracing::debug!(%uuid, user_key = %record.user_key, "Fetched org unit");
        Ok(self.resolve(record))
    }

    fn resolve(&self, record: OrgUnitRecord) -> OrgUnit {
        let current_category = record
            .hierarchy_class
            .and_then(|class| self.classes.category_for(class));
        OrgUnit {
            uuid: record.uuid,
            level: record.level,
            ancestors: record.ancestors,
            current_category,
            engagements: record.engagements,
            associations: record.associations,
            it_accounts: record.it_accounts,
        }
    }

    /// Writes `category` unless the unit's current remote category already
    /// equals it. Safe to repeat with the same arguments.
    pub async fn write_category(
        &self,
        uuid: Uuid,
        category: Category,
        effective_date: NaiveDate,
    ) -> GatewayResult<WriteOutcome> {
        let previous = self
            .inner
            .fetch_hierarchy_class(uuid)
            .await?
            .and_then(|class| self.classes.category_for(class));

        if previous == Some(category) {
            tracing::debug!(%uuid, %category, "Not updating org_unit_hierarchy, already good");
            return Ok(WriteOutcome::Unchanged);
        }

        self.inner
            .update_hierarchy_class(uuid, self.classes.class_for(category), effective_date)
            .await?;
        Ok(WriteOutcome::Written { previous })
    }
}
