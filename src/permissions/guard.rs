//! Capability checks over a resolved permission set.
//!
//! Checks never fail; a denial is `false`. Answers are memoized per guard, and a guard lives
//! exactly as long as the set it wraps, so repeated checks for the same question return the
//! same answer. The memo is bounded by the set: module and level questions, plus granted keys.

use dashmap::DashMap;
use std::sync::Arc;

use super::types::{AppModule, PermissionLevel, ResolvedPermissionSet};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GuardQuery {
    Module(AppModule),
    Permission(AppModule, String),
    Level(AppModule, PermissionLevel),
}

#[derive(Debug)]
pub struct PermissionGuard {
    set: Arc<ResolvedPermissionSet>,
    memo: DashMap<GuardQuery, bool>,
}

impl PermissionGuard {
    pub fn new(set: Arc<ResolvedPermissionSet>) -> Self {
        Self {
            set,
            memo: DashMap::new(),
        }
    }

    pub fn set(&self) -> &Arc<ResolvedPermissionSet> {
        &self.set
    }

    /// Only keys granted in the set are memoized. Any other key is answered directly, so
    /// client-supplied keys cannot grow the memo.
    pub fn has_permission(&self, module: AppModule, permission_key: &str) -> bool {
        let query = GuardQuery::Permission(module, permission_key.to_string());
        if self.set.granted(module, permission_key) {
            self.memoized(query)
        } else {
            evaluate(&self.set, &query)
        }
    }

    pub fn has_module_access(&self, module: AppModule) -> bool {
        self.memoized(GuardQuery::Module(module))
    }

    pub fn has_level(&self, module: AppModule, level: PermissionLevel) -> bool {
        self.memoized(GuardQuery::Level(module, level))
    }

    /// Number of distinct questions answered so far.
    pub fn memoized_checks(&self) -> usize {
        self.memo.len()
    }

    fn memoized(&self, query: GuardQuery) -> bool {
        if let Some(answer) = self.memo.get(&query) {
            return *answer;
        }
        let answer = evaluate(&self.set, &query);
        self.memo.insert(query, answer);
        answer
    }
}

/// System admin first, then the bypass flag, then the module-disabled short-circuit, then
/// the role grants.
fn evaluate(set: &ResolvedPermissionSet, query: &GuardQuery) -> bool {
    let module = match query {
        GuardQuery::Module(m) | GuardQuery::Permission(m, _) | GuardQuery::Level(m, _) => *m,
    };

    if set.is_system_admin() {
        return true;
    }

    if set.bypasses_custom_roles() {
        return set.is_module_enabled(module);
    }

    if !set.is_module_enabled(module) {
        return false;
    }

    match query {
        GuardQuery::Module(m) => set.granted_in(*m),
        GuardQuery::Permission(m, key) => set.granted(*m, key),
        GuardQuery::Level(m, level) => level.required_keys().iter().all(|k| set.granted(*m, k)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::types::AccessSource;
    use uuid::Uuid;

    fn custom_set(grants: &[(AppModule, &str)], enabled: &[AppModule]) -> Arc<ResolvedPermissionSet> {
        let mut set = ResolvedPermissionSet::denied(
            Uuid::new_v4(),
            Uuid::new_v4(),
            AccessSource::CustomRole {
                role_id: Uuid::new_v4(),
            },
        );
        set.enabled_modules.extend(enabled.iter().copied());
        for (module, key) in grants {
            set.permissions
                .entry(*module)
                .or_default()
                .insert(key.to_string());
        }
        Arc::new(set)
    }

    #[test]
    fn test_carwash_only_role() {
        let guard = PermissionGuard::new(custom_set(
            &[(AppModule::CarWash, "view"), (AppModule::CarWash, "create_orders")],
            &[AppModule::CarWash, AppModule::ServiceOrders],
        ));

        assert!(guard.has_module_access(AppModule::CarWash));
        assert!(!guard.has_module_access(AppModule::ServiceOrders));
        assert!(guard.has_permission(AppModule::CarWash, "create_orders"));
        assert!(!guard.has_permission(AppModule::CarWash, "delete"));
        assert!(guard.has_level(AppModule::CarWash, PermissionLevel::View));
        assert!(!guard.has_level(AppModule::CarWash, PermissionLevel::Edit));
    }

    #[test]
    fn test_system_admin_allows_everything() {
        let set = Arc::new(ResolvedPermissionSet::denied(
            Uuid::new_v4(),
            Uuid::new_v4(),
            AccessSource::SystemAdmin,
        ));
        let guard = PermissionGuard::new(set);
        for module in AppModule::ALL {
            assert!(guard.has_module_access(module));
            assert!(guard.has_permission(module, "anything_at_all"));
            assert!(guard.has_level(module, PermissionLevel::Admin));
        }
    }

    #[test]
    fn test_bypass_follows_module_toggles() {
        let mut set =
            ResolvedPermissionSet::denied(Uuid::new_v4(), Uuid::new_v4(), AccessSource::Bypass);
        set.enabled_modules.insert(AppModule::Stock);
        let guard = PermissionGuard::new(Arc::new(set));

        assert!(guard.has_permission(AppModule::Stock, "delete"));
        assert!(guard.has_level(AppModule::Stock, PermissionLevel::Admin));
        assert!(!guard.has_permission(AppModule::GetReady, "view_vehicles"));
        assert!(!guard.has_module_access(AppModule::GetReady));
    }

    #[test]
    fn test_disabled_module_short_circuits_grants() {
        // grants on a disabled module can only come from a stale or hand-built set
        let guard = PermissionGuard::new(custom_set(&[(AppModule::GetReady, "view_vehicles")], &[]));
        assert!(!guard.has_module_access(AppModule::GetReady));
        assert!(!guard.has_permission(AppModule::GetReady, "view_vehicles"));
    }

    #[test]
    fn test_unavailable_set_denies() {
        let set = Arc::new(ResolvedPermissionSet::denied(
            Uuid::new_v4(),
            Uuid::new_v4(),
            AccessSource::Unavailable,
        ));
        let guard = PermissionGuard::new(set);
        assert!(!guard.has_module_access(AppModule::Dashboard));
    }

    #[test]
    fn test_answers_are_memoized() {
        let guard = PermissionGuard::new(custom_set(&[(AppModule::Stock, "view")], &[AppModule::Stock]));
        assert!(guard.has_permission(AppModule::Stock, "view"));
        assert!(guard.has_permission(AppModule::Stock, "view"));
        assert!(guard.has_module_access(AppModule::Stock));
        assert_eq!(guard.memoized_checks(), 2);
    }

    #[test]
    fn test_unknown_keys_do_not_grow_the_memo() {
        let guard = PermissionGuard::new(custom_set(&[(AppModule::Stock, "view")], &[AppModule::Stock]));
        for i in 0..10_000 {
            assert!(!guard.has_permission(AppModule::Stock, &format!("junk_{}", i)));
        }
        assert!(guard.has_permission(AppModule::Stock, "view"));
        assert_eq!(guard.memoized_checks(), 1);
    }

    #[test]
    fn test_system_admin_answers_arbitrary_keys_without_memo() {
        let set = Arc::new(ResolvedPermissionSet::denied(
            Uuid::new_v4(),
            Uuid::new_v4(),
            AccessSource::SystemAdmin,
        ));
        let guard = PermissionGuard::new(set);
        for i in 0..100 {
            assert!(guard.has_permission(AppModule::Chat, &format!("key_{}", i)));
        }
        assert_eq!(guard.memoized_checks(), 0);
    }
}
