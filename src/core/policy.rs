use crate::config::toml_config::{ClassConfig, ClassificationConfig};
use crate::domain::model::{CategoryClasses, Policy};
use crate::domain::ports::{GatewayResult, OrgGateway};
use crate::utils::error::Result;
use std::collections::HashSet;
use uuid::Uuid;

async fn class_uuid<G: OrgGateway + ?Sized>(
    gateway: &G,
    configured: Option<Uuid>,
    user_key: &str,
) -> GatewayResult<Uuid> {
    if let Some(uuid) = configured {
        return Ok(uuid);
    }
    let uuid = gateway.resolve_class_uuid(user_key).await?;
    tracing::debug!(user_key, %uuid, "org_unit_hierarchy class uuid not set, fetched");
    Ok(uuid)
}

pub async fn resolve_classes<G: OrgGateway + ?Sized>(
    gateway: &G,
    classes: &ClassConfig,
) -> GatewayResult<CategoryClasses> {
    Ok(CategoryClasses::new(
        class_uuid(gateway, classes.line_management_uuid, &classes.line_management_user_key)
            .await?,
        class_uuid(gateway, classes.self_owned_uuid, &classes.self_owned_user_key).await?,
        class_uuid(gateway, classes.hidden_uuid, &classes.hidden_user_key).await?,
        class_uuid(
            gateway,
            classes.outside_hierarchy_uuid,
            &classes.outside_hierarchy_user_key,
        )
        .await?,
    ))
}

async fn unit_set<G: OrgGateway + ?Sized>(
    gateway: &G,
    uuids: &[Uuid],
    user_keys: &[String],
    label: &str,
) -> GatewayResult<HashSet<Uuid>> {
    let mut set: HashSet<Uuid> = uuids.iter().copied().collect();
    if !user_keys.is_empty() {
        let resolved = gateway.resolve_unit_uuids(user_keys).await?;
        if resolved.len() < user_keys.len() {
            tracing::warn!(
                label,
                configured = user_keys.len(),
                found = resolved.len(),
                "Some configured unit user-keys did not resolve"
            );
        }
        set.extend(resolved);
    }
    Ok(set)
}

/// Builds the immutable [`Policy`] from configuration, resolving every
/// user-key through the gateway once.
pub async fn resolve_policy<G: OrgGateway + ?Sized>(
    gateway: &G,
    config: &ClassificationConfig,
) -> Result<Policy> {
    let classes = resolve_classes(gateway, &config.classes).await?;

    let hidden_units = unit_set(
        gateway,
        &config.hidden_uuids,
        &config.hidden_user_keys,
        "hidden",
    )
    .await?;
    let line_management_roots = unit_set(
        gateway,
        &config.line_management_top_level_uuids,
        &config.line_management_top_level_user_keys,
        "line_management_top_level",
    )
    .await?;

    let self_owned_it_system = match (
        config.self_owned_it_system_uuid,
        &config.self_owned_it_system_user_key,
    ) {
        (Some(uuid), _) => Some(uuid),
        (None, Some(user_key)) => Some(gateway.resolve_it_system_uuid(user_key).await?),
        (None, None) => None,
    };

    let policy = Policy {
        hide_logic_enabled: config.enable_hide_logic,
        hidden_units,
        line_management_roots,
        self_owned_it_system,
        ignored_engagement_types: config.ignored_engagement_types.iter().cloned().collect(),
        classes,
    };
    tracing::info!(
        hidden = policy.hidden_units.len(),
        line_management_roots = policy.line_management_roots.len(),
        self_owned_it_system = ?policy.self_owned_it_system,
        hide_logic_enabled = policy.hide_logic_enabled,
        "Resolved classification policy"
    );
    Ok(policy)
}
