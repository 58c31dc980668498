//! Effective permission resolution.
//!
//! Priority order, first match wins:
//! 1. `system_admin` gets every module and key, dealership toggles included.
//! 2. `bypass_custom_roles` gets every key of every module the dealership has enabled.
//! 3. Otherwise the grants of the membership's custom role, minus disabled modules.
//! 4. Anything else resolves to the empty set.
//!
//! A module without a toggle row counts as disabled.

use std::collections::{HashMap, HashSet};
use tracing::warn;

use super::types::{AccessSource, AppModule, ResolvedPermissionSet, UserRole};
use crate::store::PermissionRows;

pub fn resolve(rows: &PermissionRows) -> ResolvedPermissionSet {
    let enabled_modules = enabled_modules(rows);

    let Some(user) = rows.user.as_ref().filter(|u| u.is_active) else {
        return ResolvedPermissionSet::denied(
            rows.user_id,
            rows.dealership_id,
            AccessSource::NoRole,
        );
    };

    if user.role == UserRole::SystemAdmin {
        return ResolvedPermissionSet {
            user_id: rows.user_id,
            dealership_id: rows.dealership_id,
            source: AccessSource::SystemAdmin,
            enabled_modules: AppModule::ALL.into_iter().collect(),
            permissions: HashMap::new(),
        };
    }

    if user.bypass_custom_roles {
        return ResolvedPermissionSet {
            user_id: rows.user_id,
            dealership_id: rows.dealership_id,
            source: AccessSource::Bypass,
            enabled_modules,
            permissions: HashMap::new(),
        };
    }

    let role = rows
        .membership
        .as_ref()
        .filter(|m| m.is_active)
        .and(rows.role.as_ref())
        .filter(|r| r.is_active);

    let Some(role) = role else {
        return ResolvedPermissionSet {
            enabled_modules,
            ..ResolvedPermissionSet::denied(rows.user_id, rows.dealership_id, AccessSource::NoRole)
        };
    };

    let mut permissions: HashMap<AppModule, HashSet<String>> = HashMap::new();
    for grant in &rows.grants {
        let module = match grant.module.parse::<AppModule>() {
            Ok(module) => module,
            Err(e) => {
                warn!(error = %e, role_id = %role.id, "Skipping grant for unknown module");
                continue;
            }
        };

        if !enabled_modules.contains(&module) {
            continue;
        }

        permissions
            .entry(module)
            .or_default()
            .insert(grant.permission_key.clone());
    }

    ResolvedPermissionSet {
        user_id: rows.user_id,
        dealership_id: rows.dealership_id,
        source: AccessSource::CustomRole { role_id: role.id },
        enabled_modules,
        permissions,
    }
}

fn enabled_modules(rows: &PermissionRows) -> HashSet<AppModule> {
    rows.toggles
        .iter()
        .filter(|t| t.is_enabled)
        .filter_map(|t| match t.module.parse::<AppModule>() {
            Ok(module) => Some(module),
            Err(e) => {
                warn!(error = %e, dealership_id = %rows.dealership_id, "Ignoring toggle for unknown module");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{GrantRow, MembershipRow, RoleRow, ToggleRow, UserRow};
    use uuid::Uuid;

    fn rows_for(role: UserRole, bypass: bool) -> PermissionRows {
        let mut rows = PermissionRows::empty(Uuid::new_v4(), Uuid::new_v4());
        rows.user = Some(UserRow {
            role,
            bypass_custom_roles: bypass,
            is_active: true,
        });
        rows
    }

    fn with_role(mut rows: PermissionRows, grants: &[(&str, &str)]) -> PermissionRows {
        let role_id = Uuid::new_v4();
        rows.membership = Some(MembershipRow {
            custom_role_id: Some(role_id),
            is_active: true,
        });
        rows.role = Some(RoleRow {
            id: role_id,
            is_active: true,
        });
        rows.grants = grants
            .iter()
            .map(|(m, k)| GrantRow {
                module: m.to_string(),
                permission_key: k.to_string(),
            })
            .collect();
        rows
    }

    fn toggle(module: &str, is_enabled: bool) -> ToggleRow {
        ToggleRow {
            module: module.to_string(),
            is_enabled,
        }
    }

    #[test]
    fn test_system_admin_ignores_toggles_and_roles() {
        let rows = with_role(rows_for(UserRole::SystemAdmin, false), &[]);
        let set = resolve(&rows);
        assert_eq!(set.source, AccessSource::SystemAdmin);
        assert_eq!(set.enabled_modules.len(), AppModule::ALL.len());
    }

    #[test]
    fn test_bypass_only_enables_toggled_modules() {
        let mut rows = rows_for(UserRole::Supermanager, true);
        rows.toggles = vec![toggle("stock", true), toggle("get_ready", false)];
        let set = resolve(&rows);
        assert_eq!(set.source, AccessSource::Bypass);
        assert!(set.is_module_enabled(AppModule::Stock));
        assert!(!set.is_module_enabled(AppModule::GetReady));
        assert!(!set.is_module_enabled(AppModule::CarWash));
    }

    #[test]
    fn test_bypass_skips_role_lookup() {
        let mut rows = with_role(rows_for(UserRole::Supermanager, true), &[("stock", "view")]);
        rows.toggles = vec![toggle("stock", true)];
        let set = resolve(&rows);
        assert_eq!(set.source, AccessSource::Bypass);
        assert!(set.permissions.is_empty());
    }

    #[test]
    fn test_custom_role_grants_are_intersected_with_toggles() {
        let mut rows = with_role(
            rows_for(UserRole::User, false),
            &[
                ("get_ready", "view_vehicles"),
                ("stock", "view"),
                ("car_wash", "view"),
            ],
        );
        rows.toggles = vec![toggle("get_ready", false), toggle("stock", true)];

        let set = resolve(&rows);
        assert!(set.granted(AppModule::Stock, "view"));
        assert!(!set.granted(AppModule::GetReady, "view_vehicles"));
        // no toggle row for car_wash
        assert!(!set.granted(AppModule::CarWash, "view"));
        assert_eq!(set.grant_count(), 1);
    }

    #[test]
    fn test_no_custom_role_resolves_to_empty_set() {
        let mut rows = rows_for(UserRole::User, false);
        rows.membership = Some(MembershipRow {
            custom_role_id: None,
            is_active: true,
        });
        rows.toggles = vec![toggle("stock", true)];
        let set = resolve(&rows);
        assert_eq!(set.source, AccessSource::NoRole);
        assert_eq!(set.grant_count(), 0);
    }

    #[test]
    fn test_supermanager_without_bypass_uses_custom_role() {
        let mut rows = with_role(rows_for(UserRole::Supermanager, false), &[("stock", "view")]);
        rows.toggles = vec![toggle("stock", true)];
        let set = resolve(&rows);
        assert!(matches!(set.source, AccessSource::CustomRole { .. }));
        assert!(set.granted(AppModule::Stock, "view"));
    }

    #[test]
    fn test_inactive_role_and_membership_deny() {
        let mut rows = with_role(rows_for(UserRole::User, false), &[("stock", "view")]);
        rows.toggles = vec![toggle("stock", true)];
        rows.role.as_mut().unwrap().is_active = false;
        assert_eq!(resolve(&rows).source, AccessSource::NoRole);

        let mut rows = with_role(rows_for(UserRole::User, false), &[("stock", "view")]);
        rows.toggles = vec![toggle("stock", true)];
        rows.membership.as_mut().unwrap().is_active = false;
        assert_eq!(resolve(&rows).source, AccessSource::NoRole);
    }

    #[test]
    fn test_inactive_or_missing_user_denies() {
        let mut rows = rows_for(UserRole::SystemAdmin, false);
        rows.user.as_mut().unwrap().is_active = false;
        assert_eq!(resolve(&rows).source, AccessSource::NoRole);

        let rows = PermissionRows::empty(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(resolve(&rows).source, AccessSource::NoRole);
    }

    #[test]
    fn test_unknown_modules_are_skipped() {
        let mut rows = with_role(
            rows_for(UserRole::User, false),
            &[("hovercraft", "view"), ("stock", "view")],
        );
        rows.toggles = vec![toggle("hovercraft", true), toggle("stock", true)];
        let set = resolve(&rows);
        assert_eq!(set.grant_count(), 1);
        assert_eq!(set.enabled_modules.len(), 1);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let mut rows = with_role(
            rows_for(UserRole::User, false),
            &[("stock", "view"), ("stock", "edit"), ("chat", "view")],
        );
        rows.toggles = vec![toggle("stock", true), toggle("chat", true)];
        assert_eq!(resolve(&rows), resolve(&rows));

        let mut reordered = rows.clone();
        reordered.grants.reverse();
        reordered.toggles.reverse();
        assert_eq!(resolve(&rows), resolve(&reordered));
    }
}
