//! OS2mo GraphQL implementation of [`OrgGateway`].

use crate::adapters::auth::TokenProvider;
use crate::config::GatekeeperConfig;
use crate::domain::model::{EngagementRef, ItAccount, OrgUnitRecord};
use crate::domain::ports::{GatewayResult, OrgGateway};
use crate::utils::error::{GatekeeperError, GatewayError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

const UNIT_CONTEXT_QUERY: &str = r#"
query OrgUnitContextQuery($uuids: [UUID!]) {
    org_units(uuids: $uuids) {
        objects {
            uuid
            user_key
            org_unit_hierarchy
            org_unit_level { user_key }
            ancestors { uuid }
            engagements { uuid engagement_type { name } }
            associations { uuid }
            itusers { user_key itsystem_uuid }
        }
    }
}
"#;

const HIERARCHY_QUERY: &str = r#"
query OrgUnitHierarchyQuery($uuids: [UUID!]) {
    org_units(uuids: $uuids) {
        objects { org_unit_hierarchy }
    }
}
"#;

const UPDATE_HIERARCHY_MUTATION: &str = r#"
mutation UpdateOrgUnitHierarchy($input: OrganisationUnitUpdateInput!) {
    org_unit_update(input: $input) { uuid }
}
"#;

const CLASS_QUERY: &str = r#"
query ClassQuery($user_keys: [String!]) {
    classes(user_keys: $user_keys) { uuid }
}
"#;

const IT_SYSTEM_QUERY: &str = r#"
query ITSystemQuery($user_keys: [String!]) {
    itsystems(user_keys: $user_keys) { uuid }
}
"#;

const UNITS_BY_USER_KEY_QUERY: &str = r#"
query OrgUnitsByUserKeyQuery($user_keys: [String!]) {
    org_units(user_keys: $user_keys) { uuid }
}
"#;

const ALL_UNITS_QUERY: &str = r#"
query AllOrgUnitsQuery {
    org_units {
        uuid
        objects { org_unit_hierarchy }
    }
}
"#;

const ENGAGEMENT_UNITS_QUERY: &str = r#"
query EngagementOrgUnitsQuery($uuids: [UUID!]) {
    engagements(uuids: $uuids, from_date: null, to_date: null) {
        objects { org_unit_uuid }
    }
}
"#;

const ASSOCIATION_UNITS_QUERY: &str = r#"
query AssociationOrgUnitsQuery($uuids: [UUID!]) {
    associations(uuids: $uuids, from_date: null, to_date: null) {
        objects { org_unit_uuid }
    }
}
"#;

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Objects<T> {
    objects: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct UuidRef {
    uuid: Uuid,
}

#[derive(Debug, Deserialize)]
struct UserKeyRef {
    user_key: String,
}

#[derive(Debug, Deserialize)]
struct NameRef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct EngagementObject {
    uuid: Uuid,
    engagement_type: Option<NameRef>,
}

#[derive(Debug, Deserialize)]
struct ItUserObject {
    user_key: String,
    itsystem_uuid: Uuid,
}

#[derive(Debug, Deserialize)]
struct UnitObject {
    uuid: Uuid,
    user_key: String,
    org_unit_hierarchy: Option<Uuid>,
    org_unit_level: Option<UserKeyRef>,
    /// Nearest ancestor first.
    #[serde(default)]
    ancestors: Vec<UuidRef>,
    #[serde(default)]
    engagements: Vec<EngagementObject>,
    #[serde(default)]
    associations: Vec<UuidRef>,
    #[serde(default)]
    itusers: Vec<ItUserObject>,
}

impl From<UnitObject> for OrgUnitRecord {
    fn from(obj: UnitObject) -> Self {
        OrgUnitRecord {
            uuid: obj.uuid,
            user_key: obj.user_key,
            level: obj.org_unit_level.map(|l| l.user_key),
            ancestors: obj.ancestors.into_iter().rev().map(|a| a.uuid).collect(),
            hierarchy_class: obj.org_unit_hierarchy,
            engagements: obj
                .engagements
                .into_iter()
                .map(|e| EngagementRef {
                    uuid: e.uuid,
                    engagement_type: e.engagement_type.map(|t| t.name),
                })
                .collect(),
            associations: obj.associations.into_iter().map(|a| a.uuid).collect(),
            it_accounts: obj
                .itusers
                .into_iter()
                .map(|i| ItAccount {
                    it_system: i.itsystem_uuid,
                    user_key: i.user_key,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HierarchyObject {
    org_unit_hierarchy: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
struct OrgUnitsData<T> {
    org_units: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ClassesData {
    classes: Vec<UuidRef>,
}

#[derive(Debug, Deserialize)]
struct ItSystemsData {
    itsystems: Vec<UuidRef>,
}

#[derive(Debug, Deserialize)]
struct UnitListEntry {
    uuid: Uuid,
    #[serde(default)]
    objects: Vec<HierarchyObject>,
}

#[derive(Debug, Deserialize)]
struct OrgUnitRef {
    org_unit_uuid: Uuid,
}

#[derive(Debug, Deserialize)]
struct EngagementsData {
    engagements: Vec<Objects<OrgUnitRef>>,
}

#[derive(Debug, Deserialize)]
struct AssociationsData {
    associations: Vec<Objects<OrgUnitRef>>,
}

/// Exactly one element, `NotFound` for none.
fn single<T>(items: Vec<T>, what: &str) -> GatewayResult<T> {
    let mut iter = items.into_iter();
    match (iter.next(), iter.next()) {
        (Some(item), None) => Ok(item),
        (None, _) => Err(GatewayError::NotFound(what.to_string())),
        (Some(_), Some(_)) => Err(GatewayError::Protocol(format!(
            "expected one {}, got several",
            what
        ))),
    }
}

fn unit_objects<T>(data: OrgUnitsData<Objects<T>>, uuid: Uuid) -> GatewayResult<T> {
    let what = format!("org unit {}", uuid);
    let entry = single(data.org_units, &what)?;
    single(entry.objects, &what)
}

fn org_unit_uuids(objects: Vec<Objects<OrgUnitRef>>, what: &str) -> GatewayResult<Vec<Uuid>> {
    if objects.is_empty() {
        return Err(GatewayError::NotFound(what.to_string()));
    }
    let mut units: Vec<Uuid> = objects
        .into_iter()
        .flat_map(|o| o.objects)
        .map(|o| o.org_unit_uuid)
        .collect();
    units.sort();
    units.dedup();
    Ok(units)
}

pub struct MoGraphQlGateway {
    client: Client,
    endpoint: String,
    auth: TokenProvider,
}

impl MoGraphQlGateway {
    pub fn new(client: Client, mo_url: &str, auth: TokenProvider) -> Self {
        Self {
            client,
            endpoint: format!("{}/graphql", mo_url.trim_end_matches('/')),
            auth,
        }
    }

    pub fn from_config(config: &GatekeeperConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.graphql_timeout())
            .build()
            .map_err(|e| GatekeeperError::ConfigValidationError {
                field: "mo".to_string(),
                message: format!("failed to build HTTP client: {}", e),
            })?;
        let auth = TokenProvider::new(
            client.clone(),
            &config.mo.auth_server,
            &config.mo.auth_realm,
            config.mo.client_id.clone(),
            config.client_secret()?,
        );
        Ok(Self::new(client, &config.mo.url, auth))
    }

    async fn post(&self, body: &Value) -> GatewayResult<reqwest::Response> {
        let token = self.auth.token().await?;
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        Ok(response)
    }

    async fn execute<T: DeserializeOwned>(&self, query: &str, variables: Value) -> GatewayResult<T> {
        let body = json!({ "query": query, "variables": variables });

        let mut response = self.post(&body).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            // The cached token may have been revoked; try once with a fresh one.
            self.auth.invalidate().await;
            response = self.post(&body).await?;
        }

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(status.as_u16(), text));
        }

        let parsed: GraphQlResponse<T> = response
            .json()
            .await
            .map_err(|e| GatewayError::Protocol(format!("invalid GraphQL response: {}", e)))?;

        if !parsed.errors.is_empty() {
            let messages: Vec<String> = parsed.errors.into_iter().map(|e| e.message).collect();
            return Err(GatewayError::Protocol(messages.join("; ")));
        }
        parsed
            .data
            .ok_or_else(|| GatewayError::Protocol("GraphQL response without data".to_string()))
    }
}

#[async_trait]
impl OrgGateway for MoGraphQlGateway {
    async fn fetch_unit(&self, uuid: Uuid) -> GatewayResult<OrgUnitRecord> {
        tracing::debug!(%uuid, "Fetching org-unit via GraphQL");
        let data: OrgUnitsData<Objects<UnitObject>> = self
            .execute(UNIT_CONTEXT_QUERY, json!({ "uuids": [uuid] }))
            .await?;
        unit_objects(data, uuid).map(OrgUnitRecord::from)
    }

    async fn fetch_hierarchy_class(&self, uuid: Uuid) -> GatewayResult<Option<Uuid>> {
        let data: OrgUnitsData<Objects<HierarchyObject>> = self
            .execute(HIERARCHY_QUERY, json!({ "uuids": [uuid] }))
            .await?;
        unit_objects(data, uuid).map(|o| o.org_unit_hierarchy)
    }

    async fn update_hierarchy_class(
        &self,
        uuid: Uuid,
        class: Uuid,
        from_date: NaiveDate,
    ) -> GatewayResult<()> {
        let input = json!({
            "uuid": uuid,
            "validity": { "from": from_date.format("%Y-%m-%d").to_string() },
            "org_unit_hierarchy": class,
        });
        tracing::debug!(%input, "Sending org_unit_update");
        let _: Value = self
            .execute(UPDATE_HIERARCHY_MUTATION, json!({ "input": input }))
            .await?;
        Ok(())
    }

    async fn resolve_class_uuid(&self, user_key: &str) -> GatewayResult<Uuid> {
        let data: ClassesData = self
            .execute(CLASS_QUERY, json!({ "user_keys": [user_key] }))
            .await?;
        single(data.classes, &format!("class {}", user_key)).map(|c| c.uuid)
    }

    async fn resolve_it_system_uuid(&self, user_key: &str) -> GatewayResult<Uuid> {
        let data: ItSystemsData = self
            .execute(IT_SYSTEM_QUERY, json!({ "user_keys": [user_key] }))
            .await?;
        let it_system = single(data.itsystems, &format!("it-system {}", user_key))?;
        tracing::debug!(user_key, uuid = %it_system.uuid, "Looked up it-system");
        Ok(it_system.uuid)
    }

    async fn resolve_unit_uuids(&self, user_keys: &[String]) -> GatewayResult<Vec<Uuid>> {
        let data: OrgUnitsData<UuidRef> = self
            .execute(UNITS_BY_USER_KEY_QUERY, json!({ "user_keys": user_keys }))
            .await?;
        Ok(data.org_units.into_iter().map(|u| u.uuid).collect())
    }

    async fn list_unit_uuids(&self, missing_category_only: bool) -> GatewayResult<Vec<Uuid>> {
        let data: OrgUnitsData<UnitListEntry> = self.execute(ALL_UNITS_QUERY, json!({})).await?;
        Ok(data
            .org_units
            .into_iter()
            .filter(|u| {
                !missing_category_only
                    || u.objects
                        .first()
                        .map_or(true, |o| o.org_unit_hierarchy.is_none())
            })
            .map(|u| u.uuid)
            .collect())
    }

    async fn units_for_engagement(&self, engagement: Uuid) -> GatewayResult<Vec<Uuid>> {
        let data: EngagementsData = self
            .execute(ENGAGEMENT_UNITS_QUERY, json!({ "uuids": [engagement] }))
            .await?;
        org_unit_uuids(data.engagements, &format!("engagement {}", engagement))
    }

    async fn units_for_association(&self, association: Uuid) -> GatewayResult<Vec<Uuid>> {
        let data: AssociationsData = self
            .execute(ASSOCIATION_UNITS_QUERY, json!({ "uuids": [association] }))
            .await?;
        org_unit_uuids(data.associations, &format!("association {}", association))
    }
}
