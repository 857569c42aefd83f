//! Maps a unit's resolved state onto exactly one [`Category`].
//!
//! First match wins:
//!
//! 1. self or any ancestor is hidden -> `Hidden`
//! 2. self or any ancestor is a line-management root -> `LineManagement`
//! 3. unit level `NY{x}-niveau` -> `LineManagement`
//! 4. unit level `Afdelings-niveau` with people attached -> `LineManagement`
//! 5. an IT account in the self-owned IT system -> `SelfOwned`
//! 6. otherwise `OutsideHierarchy`

use crate::domain::model::{Category, OrgUnit, Policy};
use regex::Regex;
use std::sync::LazyLock;

pub const DEPARTMENT_LEVEL: &str = "Afdelings-niveau";

static NY_LEVEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^NY\d+-niveau$").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitLevel {
    Ny,
    Department,
    Other,
}

fn unit_level(level: Option<&str>) -> UnitLevel {
    match level {
        Some(l) if NY_LEVEL.is_match(l) => UnitLevel::Ny,
        Some(DEPARTMENT_LEVEL) => UnitLevel::Department,
        _ => UnitLevel::Other,
    }
}

fn has_people(unit: &OrgUnit, policy: &Policy) -> bool {
    let counted_engagement = unit.engagements.iter().any(|e| {
        e.engagement_type
            .as_ref()
            .map_or(true, |t| !policy.ignored_engagement_types.contains(t))
    });
    counted_engagement || !unit.associations.is_empty()
}

pub fn classify(unit: &OrgUnit, policy: &Policy) -> Category {
    if policy.hide_logic_enabled
        && unit
            .self_and_ancestors()
            .any(|uuid| policy.hidden_units.contains(uuid))
    {
        return Category::Hidden;
    }

    if unit
        .self_and_ancestors()
        .any(|uuid| policy.line_management_roots.contains(uuid))
    {
        return Category::LineManagement;
    }

    match unit_level(unit.level.as_deref()) {
        UnitLevel::Ny => return Category::LineManagement,
        UnitLevel::Department if has_people(unit, policy) => return Category::LineManagement,
        _ => {}
    }

    if let Some(system) = policy.self_owned_it_system {
        if unit.it_accounts.iter().any(|a| a.it_system == system) {
            return Category::SelfOwned;
        }
    }

    Category::OutsideHierarchy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{CategoryClasses, EngagementRef, ItAccount};
    use uuid::Uuid;

    fn policy() -> Policy {
        let mut policy = Policy::new(CategoryClasses::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
        ));
        policy.self_owned_it_system = Some(Uuid::new_v4());
        policy
    }

    fn unit_with_level(level: &str) -> OrgUnit {
        let mut unit = OrgUnit::new(Uuid::new_v4());
        unit.level = Some(level.to_string());
        unit
    }

    fn self_owned_account(policy: &Policy) -> ItAccount {
        ItAccount {
            it_system: policy.self_owned_it_system.unwrap(),
            user_key: "selvejet-konto".to_string(),
        }
    }

    #[test]
    fn ny_level_is_line_management() {
        let unit = unit_with_level("NY1-niveau");
        assert_eq!(classify(&unit, &policy()), Category::LineManagement);
        let unit = unit_with_level("NY12-niveau");
        assert_eq!(classify(&unit, &policy()), Category::LineManagement);
    }

    #[test]
    fn department_without_people_but_it_account_is_self_owned() {
        let policy = policy();
        let mut unit = unit_with_level(DEPARTMENT_LEVEL);
        unit.it_accounts.push(self_owned_account(&policy));
        assert_eq!(classify(&unit, &policy), Category::SelfOwned);
    }

    #[test]
    fn department_with_association_is_line_management() {
        let mut unit = unit_with_level(DEPARTMENT_LEVEL);
        unit.associations.push(Uuid::new_v4());
        assert_eq!(classify(&unit, &policy()), Category::LineManagement);
    }

    #[test]
    fn ignored_engagement_types_do_not_count() {
        let mut policy = policy();
        policy
            .ignored_engagement_types
            .insert("Timelønnet".to_string());
        let mut unit = unit_with_level(DEPARTMENT_LEVEL);
        unit.engagements.push(EngagementRef {
            uuid: Uuid::new_v4(),
            engagement_type: Some("Timelønnet".to_string()),
        });
        assert_eq!(classify(&unit, &policy), Category::OutsideHierarchy);

        unit.engagements.push(EngagementRef {
            uuid: Uuid::new_v4(),
            engagement_type: Some("Ansat".to_string()),
        });
        assert_eq!(classify(&unit, &policy), Category::LineManagement);
    }

    #[test]
    fn hidden_self_dominates_ny_level() {
        let mut policy = policy();
        let unit = unit_with_level("NY1-niveau");
        policy.hidden_units.insert(unit.uuid);
        assert_eq!(classify(&unit, &policy), Category::Hidden);
    }

    #[test]
    fn hidden_is_ignored_when_hide_logic_disabled() {
        let mut policy = policy();
        policy.hide_logic_enabled = false;
        let unit = unit_with_level("NY1-niveau");
        policy.hidden_units.insert(unit.uuid);
        assert_eq!(classify(&unit, &policy), Category::LineManagement);
    }

    #[test]
    fn ancestor_line_management_root_forces_line_management() {
        let mut policy = policy();
        let root = Uuid::new_v4();
        policy.line_management_roots.insert(root);
        let mut unit = unit_with_level("Something-else");
        unit.ancestors = vec![root, Uuid::new_v4()];
        assert_eq!(classify(&unit, &policy), Category::LineManagement);
    }

    #[test]
    fn hidden_ancestor_beats_line_management_root() {
        let mut policy = policy();
        let hidden = Uuid::new_v4();
        let mut unit = OrgUnit::new(Uuid::new_v4());
        unit.ancestors = vec![hidden];
        policy.hidden_units.insert(hidden);
        policy.line_management_roots.insert(unit.uuid);
        assert_eq!(classify(&unit, &policy), Category::Hidden);
    }

    #[test]
    fn level_rules_dominate_self_owned() {
        let policy = policy();
        let mut unit = unit_with_level("NY3-niveau");
        unit.it_accounts.push(self_owned_account(&policy));
        assert_eq!(classify(&unit, &policy), Category::LineManagement);
    }

    #[test]
    fn unknown_level_falls_through() {
        let policy = policy();
        let mut unit = unit_with_level("ny1-NIVEAU");
        unit.engagements.push(EngagementRef {
            uuid: Uuid::new_v4(),
            engagement_type: None,
        });
        assert_eq!(classify(&unit, &policy), Category::OutsideHierarchy);
        unit.level = None;
        assert_eq!(classify(&unit, &policy), Category::OutsideHierarchy);
    }

    #[test]
    fn no_self_owned_system_never_yields_self_owned() {
        let mut policy = policy();
        let mut unit = OrgUnit::new(Uuid::new_v4());
        unit.it_accounts.push(self_owned_account(&policy));
        policy.self_owned_it_system = None;
        assert_eq!(classify(&unit, &policy), Category::OutsideHierarchy);
    }
}
