use crate::domain::model::OrgUnitRecord;
use crate::utils::error::{GatewayError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::time::Duration;
use uuid::Uuid;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Read/write access to the organisation platform.
#[async_trait]
pub trait OrgGateway: Send + Sync {
    /// Unit state including ancestors, engagements, associations and IT accounts.
    async fn fetch_unit(&self, uuid: Uuid) -> GatewayResult<OrgUnitRecord>;

    /// Only the current `org_unit_hierarchy` class of the unit.
    async fn fetch_hierarchy_class(&self, uuid: Uuid) -> GatewayResult<Option<Uuid>>;

    async fn update_hierarchy_class(
        &self,
        uuid: Uuid,
        class: Uuid,
        from_date: NaiveDate,
    ) -> GatewayResult<()>;

    async fn resolve_class_uuid(&self, user_key: &str) -> GatewayResult<Uuid>;

    async fn resolve_it_system_uuid(&self, user_key: &str) -> GatewayResult<Uuid>;

    async fn resolve_unit_uuids(&self, user_keys: &[String]) -> GatewayResult<Vec<Uuid>>;

    async fn list_unit_uuids(&self, missing_category_only: bool) -> GatewayResult<Vec<Uuid>>;

    async fn units_for_engagement(&self, engagement: Uuid) -> GatewayResult<Vec<Uuid>>;

    async fn units_for_association(&self, association: Uuid) -> GatewayResult<Vec<Uuid>>;
}

/// Time source for effective dates and retry delays.
#[async_trait]
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Final disposition of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue,
    Drop,
}

#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn settle(&self, disposition: Disposition) -> Result<()>;
}

pub struct Delivery {
    pub routing_key: String,
    pub body: Vec<u8>,
    pub redelivered: bool,
    pub acker: Box<dyn Acknowledger>,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("body_len", &self.body.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

#[async_trait]
pub trait Subscription: Send {
    /// `None` once the broker closed the consumer. Must be cancel-safe: the
    /// consumer drops a pending call whenever a dispatch finishes first.
    async fn next_delivery(&mut self) -> Option<Result<Delivery>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    pub exchange: String,
    pub queue: String,
    pub bindings: Vec<String>,
    pub prefetch: u16,
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn subscribe(&self, spec: &SubscriptionSpec) -> Result<Box<dyn Subscription>>;
}
