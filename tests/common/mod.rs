#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use orggatekeeper::domain::model::{Category, CategoryClasses, OrgUnitRecord, Policy};
use orggatekeeper::domain::ports::{
    Acknowledger, Broker, Clock, Delivery, Disposition, GatewayResult, OrgGateway, Subscription,
    SubscriptionSpec,
};
use orggatekeeper::utils::error::{GatewayError, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

pub struct Classes {
    pub line_management: Uuid,
    pub self_owned: Uuid,
    pub hidden: Uuid,
    pub outside_hierarchy: Uuid,
}

impl Classes {
    pub fn new() -> Self {
        Self {
            line_management: Uuid::new_v4(),
            self_owned: Uuid::new_v4(),
            hidden: Uuid::new_v4(),
            outside_hierarchy: Uuid::new_v4(),
        }
    }

    pub fn mapping(&self) -> CategoryClasses {
        CategoryClasses::new(
            self.line_management,
            self.self_owned,
            self.hidden,
            self.outside_hierarchy,
        )
    }

    pub fn policy(&self) -> Policy {
        Policy::new(self.mapping())
    }

    pub fn class_for(&self, category: Category) -> Uuid {
        self.mapping().class_for(category)
    }
}

pub fn record(uuid: Uuid, level: Option<&str>) -> OrgUnitRecord {
    OrgUnitRecord {
        uuid,
        user_key: format!("unit-{}", &uuid.to_string()[..8]),
        level: level.map(str::to_string),
        ancestors: Vec::new(),
        hierarchy_class: None,
        engagements: Vec::new(),
        associations: Vec::new(),
        it_accounts: Vec::new(),
    }
}

/// In-memory organisation with failure injection and write recording.
#[derive(Default)]
pub struct InMemoryOrg {
    units: Mutex<HashMap<Uuid, OrgUnitRecord>>,
    engagements: Mutex<HashMap<Uuid, Vec<Uuid>>>,
    associations: Mutex<HashMap<Uuid, Vec<Uuid>>>,
    classes: Mutex<HashMap<String, Uuid>>,
    it_systems: Mutex<HashMap<String, Uuid>>,
    failures: Mutex<VecDeque<GatewayError>>,
    unit_failures: Mutex<HashMap<Uuid, GatewayError>>,
    panic_next: AtomicBool,
    writes: Mutex<Vec<(Uuid, Uuid, NaiveDate)>>,
    latency: Mutex<Option<Duration>>,
    active_fetches: AtomicUsize,
    max_active_fetches: AtomicUsize,
    fetches: AtomicUsize,
}

impl InMemoryOrg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: OrgUnitRecord) {
        self.units.lock().unwrap().insert(record.uuid, record);
    }

    pub fn remove(&self, uuid: Uuid) {
        self.units.lock().unwrap().remove(&uuid);
    }

    pub fn add_engagement(&self, engagement: Uuid, units: Vec<Uuid>) {
        self.engagements.lock().unwrap().insert(engagement, units);
    }

    pub fn add_association(&self, association: Uuid, units: Vec<Uuid>) {
        self.associations.lock().unwrap().insert(association, units);
    }

    pub fn add_class(&self, user_key: &str, uuid: Uuid) {
        self.classes.lock().unwrap().insert(user_key.to_string(), uuid);
    }

    pub fn add_it_system(&self, user_key: &str, uuid: Uuid) {
        self.it_systems.lock().unwrap().insert(user_key.to_string(), uuid);
    }

    /// The next `times` calls to `fetch_unit` fail with `err`.
    pub fn fail_next(&self, err: GatewayError, times: usize) {
        let mut failures = self.failures.lock().unwrap();
        for _ in 0..times {
            failures.push_back(err.clone());
        }
    }

    /// Every fetch of `uuid` fails with `err`.
    pub fn fail_unit(&self, uuid: Uuid, err: GatewayError) {
        self.unit_failures.lock().unwrap().insert(uuid, err);
    }

    /// The next call to `fetch_unit` panics.
    pub fn panic_on_next_fetch(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    pub fn writes(&self) -> Vec<(Uuid, Uuid, NaiveDate)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn hierarchy_of(&self, uuid: Uuid) -> Option<Uuid> {
        self.units
            .lock()
            .unwrap()
            .get(&uuid)
            .and_then(|r| r.hierarchy_class)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_fetches(&self) -> usize {
        self.max_active_fetches.load(Ordering::SeqCst)
    }

    fn lookup(&self, uuid: Uuid) -> GatewayResult<OrgUnitRecord> {
        self.units
            .lock()
            .unwrap()
            .get(&uuid)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("org unit {}", uuid)))
    }
}

#[async_trait]
impl OrgGateway for InMemoryOrg {
    async fn fetch_unit(&self, uuid: Uuid) -> GatewayResult<OrgUnitRecord> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let active = self.active_fetches.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_fetches.fetch_max(active, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.active_fetches.fetch_sub(1, Ordering::SeqCst);

        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("injected fetch panic for {}", uuid);
        }
        let per_unit = self.unit_failures.lock().unwrap().get(&uuid).cloned();
        if let Some(err) = per_unit {
            return Err(err);
        }
        let injected = self.failures.lock().unwrap().pop_front();
        if let Some(err) = injected {
            return Err(err);
        }
        self.lookup(uuid)
    }

    async fn fetch_hierarchy_class(&self, uuid: Uuid) -> GatewayResult<Option<Uuid>> {
        self.lookup(uuid).map(|r| r.hierarchy_class)
    }

    async fn update_hierarchy_class(
        &self,
        uuid: Uuid,
        class: Uuid,
        from_date: NaiveDate,
    ) -> GatewayResult<()> {
        let mut units = self.units.lock().unwrap();
        let unit = units
            .get_mut(&uuid)
            .ok_or_else(|| GatewayError::NotFound(format!("org unit {}", uuid)))?;
        unit.hierarchy_class = Some(class);
        self.writes.lock().unwrap().push((uuid, class, from_date));
        Ok(())
    }

    async fn resolve_class_uuid(&self, user_key: &str) -> GatewayResult<Uuid> {
        self.classes
            .lock()
            .unwrap()
            .get(user_key)
            .copied()
            .ok_or_else(|| GatewayError::NotFound(format!("class {}", user_key)))
    }

    async fn resolve_it_system_uuid(&self, user_key: &str) -> GatewayResult<Uuid> {
        self.it_systems
            .lock()
            .unwrap()
            .get(user_key)
            .copied()
            .ok_or_else(|| GatewayError::NotFound(format!("it-system {}", user_key)))
    }

    async fn resolve_unit_uuids(&self, user_keys: &[String]) -> GatewayResult<Vec<Uuid>> {
        Ok(self
            .units
            .lock()
            .unwrap()
            .values()
            .filter(|r| user_keys.contains(&r.user_key))
            .map(|r| r.uuid)
            .collect())
    }

    async fn list_unit_uuids(&self, missing_category_only: bool) -> GatewayResult<Vec<Uuid>> {
        let mut uuids: Vec<Uuid> = self
            .units
            .lock()
            .unwrap()
            .values()
            .filter(|r| !missing_category_only || r.hierarchy_class.is_none())
            .map(|r| r.uuid)
            .collect();
        uuids.sort();
        Ok(uuids)
    }

    async fn units_for_engagement(&self, engagement: Uuid) -> GatewayResult<Vec<Uuid>> {
        self.engagements
            .lock()
            .unwrap()
            .get(&engagement)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("engagement {}", engagement)))
    }

    async fn units_for_association(&self, association: Uuid) -> GatewayResult<Vec<Uuid>> {
        self.associations
            .lock()
            .unwrap()
            .get(&association)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("association {}", association)))
    }
}

/// Fixed date; sleeps are recorded, not waited for.
#[derive(Default)]
pub struct FakeClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for FakeClock {
    fn today(&self) -> NaiveDate {
        today()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

pub type Settlements = Arc<Mutex<Vec<(String, Disposition)>>>;

struct RecordingAcker {
    tag: String,
    settlements: Settlements,
}

#[async_trait]
impl Acknowledger for RecordingAcker {
    async fn settle(&self, disposition: Disposition) -> Result<()> {
        self.settlements
            .lock()
            .unwrap()
            .push((self.tag.clone(), disposition));
        Ok(())
    }
}

/// Channel-backed broker. Dropping the [`Publisher`] ends the subscription.
pub struct InMemoryBroker {
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
}

pub struct Publisher {
    sender: mpsc::UnboundedSender<Delivery>,
    settlements: Settlements,
    next_tag: usize,
}

impl Publisher {
    /// Returns the delivery tag.
    pub fn publish(&mut self, routing_key: &str, body: serde_json::Value) -> String {
        self.publish_raw(routing_key, body.to_string().into_bytes(), false)
    }

    pub fn publish_raw(&mut self, routing_key: &str, body: Vec<u8>, redelivered: bool) -> String {
        self.next_tag += 1;
        let tag = self.next_tag.to_string();
        let delivery = Delivery {
            routing_key: routing_key.to_string(),
            body,
            redelivered,
            acker: Box::new(RecordingAcker {
                tag: tag.clone(),
                settlements: self.settlements.clone(),
            }),
        };
        self.sender
            .send(delivery)
            .expect("subscription dropped before publish");
        tag
    }

    pub fn settlements(&self) -> Settlements {
        self.settlements.clone()
    }
}

impl InMemoryBroker {
    pub fn new() -> (Self, Publisher) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let broker = Self {
            receiver: Mutex::new(Some(receiver)),
        };
        let publisher = Publisher {
            sender,
            settlements: Arc::new(Mutex::new(Vec::new())),
            next_tag: 0,
        };
        (broker, publisher)
    }
}

struct ChannelSubscription {
    receiver: mpsc::UnboundedReceiver<Delivery>,
}

#[async_trait]
impl Subscription for ChannelSubscription {
    async fn next_delivery(&mut self) -> Option<Result<Delivery>> {
        self.receiver.recv().await.map(Ok)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn subscribe(&self, _spec: &SubscriptionSpec) -> Result<Box<dyn Subscription>> {
        let receiver = self.receiver.lock().unwrap().take().ok_or_else(|| {
            orggatekeeper::GatekeeperError::broker("already subscribed")
        })?;
        Ok(Box::new(ChannelSubscription { receiver }))
    }
}
