use crate::utils::error::{GatekeeperError, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Structural category of an organisation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    LineManagement,
    SelfOwned,
    Hidden,
    OutsideHierarchy,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::LineManagement,
        Category::SelfOwned,
        Category::Hidden,
        Category::OutsideHierarchy,
    ];
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::LineManagement => "line_management",
            Category::SelfOwned => "self_owned",
            Category::Hidden => "hidden",
            Category::OutsideHierarchy => "outside_hierarchy",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngagementRef {
    pub uuid: Uuid,
    pub engagement_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItAccount {
    pub it_system: Uuid,
    pub user_key: String,
}

/// Raw unit state as returned by the platform. The category is still the
/// class UUID stored in the `org_unit_hierarchy` facet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgUnitRecord {
    pub uuid: Uuid,
    pub user_key: String,
    pub level: Option<String>,
    /// Root first, direct parent last.
    pub ancestors: Vec<Uuid>,
    pub hierarchy_class: Option<Uuid>,
    pub engagements: Vec<EngagementRef>,
    pub associations: Vec<Uuid>,
    pub it_accounts: Vec<ItAccount>,
}

/// A unit with its category resolved, ready for classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgUnit {
    pub uuid: Uuid,
    pub level: Option<String>,
    /// Root first, direct parent last.
    pub ancestors: Vec<Uuid>,
    pub current_category: Option<Category>,
    pub engagements: Vec<EngagementRef>,
    pub associations: Vec<Uuid>,
    pub it_accounts: Vec<ItAccount>,
}

impl OrgUnit {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            level: None,
            ancestors: Vec::new(),
            current_category: None,
            engagements: Vec::new(),
            associations: Vec::new(),
            it_accounts: Vec::new(),
        }
    }

    /// The unit itself followed by its ancestors, nearest first.
    pub fn self_and_ancestors(&self) -> impl Iterator<Item = &Uuid> {
        std::iter::once(&self.uuid).chain(self.ancestors.iter().rev())
    }

    pub fn parent(&self) -> Option<Uuid> {
        self.ancestors.last().copied()
    }
}

/// Class UUIDs in the `org_unit_hierarchy` facet, one per category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryClasses {
    by_category: HashMap<Category, Uuid>,
}

impl CategoryClasses {
    pub fn new(
        line_management: Uuid,
        self_owned: Uuid,
        hidden: Uuid,
        outside_hierarchy: Uuid,
    ) -> Self {
        let by_category = HashMap::from([
            (Category::LineManagement, line_management),
            (Category::SelfOwned, self_owned),
            (Category::Hidden, hidden),
            (Category::OutsideHierarchy, outside_hierarchy),
        ]);
        Self { by_category }
    }

    pub fn class_for(&self, category: Category) -> Uuid {
        self.by_category[&category]
    }

    /// Unknown classes map to `None`, which always triggers a rewrite.
    pub fn category_for(&self, class: Uuid) -> Option<Category> {
        self.by_category
            .iter()
            .find(|(_, uuid)| **uuid == class)
            .map(|(category, _)| *category)
    }
}

/// Immutable classification settings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Policy {
    pub hide_logic_enabled: bool,
    pub hidden_units: HashSet<Uuid>,
    pub line_management_roots: HashSet<Uuid>,
    pub self_owned_it_system: Option<Uuid>,
    pub ignored_engagement_types: HashSet<String>,
    pub classes: CategoryClasses,
}

impl Policy {
    pub fn new(classes: CategoryClasses) -> Self {
        Self {
            hide_logic_enabled: true,
            hidden_units: HashSet::new(),
            line_management_roots: HashSet::new(),
            self_owned_it_system: None,
            ignored_engagement_types: HashSet::new(),
            classes,
        }
    }
}

/// `<service>.<object>.<request>`, e.g. `org_unit.it.create`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey {
    pub service_type: String,
    pub object_type: String,
    pub request_type: String,
}

impl FromStr for RoutingKey {
    type Err = GatekeeperError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [service, object, request]
                if !service.is_empty() && !object.is_empty() && !request.is_empty() =>
            {
                Ok(Self {
                    service_type: service.to_string(),
                    object_type: object.to_string(),
                    request_type: request.to_string(),
                })
            }
            _ => Err(GatekeeperError::malformed(format!(
                "routing key '{}' is not <service>.<object>.<request>",
                s
            ))),
        }
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            self.service_type, self.object_type, self.request_type
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventPayload {
    pub uuid: Uuid,
    #[serde(default)]
    pub object_uuid: Option<Uuid>,
    #[serde(default)]
    pub time: Option<String>,
}

/// What a change notification points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTarget {
    Unit(Uuid),
    Engagement(Uuid),
    Association(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub routing_key: RoutingKey,
    pub payload: EventPayload,
}

impl ChangeEvent {
    pub fn parse(routing_key: &str, body: &[u8]) -> Result<Self> {
        let routing_key: RoutingKey = routing_key.parse()?;
        let payload: EventPayload = serde_json::from_slice(body)
            .map_err(|e| GatekeeperError::malformed(format!("payload: {}", e)))?;
        Ok(Self {
            routing_key,
            payload,
        })
    }

    pub fn target(&self) -> Result<EventTarget> {
        let key = &self.routing_key;
        match (key.service_type.as_str(), key.object_type.as_str()) {
            ("org_unit", "org_unit" | "it" | "engagement" | "association") => {
                Ok(EventTarget::Unit(self.payload.uuid))
            }
            ("employee", "engagement") => self
                .object_uuid("engagement")
                .map(EventTarget::Engagement),
            ("employee", "association") => self
                .object_uuid("association")
                .map(EventTarget::Association),
            _ => Err(GatekeeperError::malformed(format!(
                "unsupported routing key {}",
                key
            ))),
        }
    }

    fn object_uuid(&self, kind: &str) -> Result<Uuid> {
        self.payload
            .object_uuid
            .ok_or_else(|| GatekeeperError::malformed(format!("{} event without object_uuid", kind)))
    }
}
