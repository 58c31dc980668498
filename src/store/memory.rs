//! In-process permission store for embedding and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

use super::{
    GrantRow, MembershipRow, PermissionRows, PermissionStore, RoleRow, StoreError, ToggleRow,
    UserRow,
};
use crate::permissions::types::{AppModule, UserRole};

#[derive(Default)]
pub struct InMemoryPermissionStore {
    users: DashMap<Uuid, UserRow>,
    memberships: DashMap<(Uuid, Uuid), MembershipRow>,
    roles: DashMap<Uuid, (Uuid, RoleRow)>,
    grants: DashMap<Uuid, Vec<GrantRow>>,
    toggles: DashMap<Uuid, HashMap<String, bool>>,
    fetches: AtomicUsize,
    failing: AtomicBool,
    latency: Option<Duration>,
}

impl InMemoryPermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every fetch after its rows are read, which makes concurrent fetches overlap.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Default::default()
        }
    }

    pub fn add_user(&self, user_id: Uuid, role: UserRole, bypass_custom_roles: bool) {
        self.users.insert(
            user_id,
            UserRow {
                role,
                bypass_custom_roles,
                is_active: true,
            },
        );
    }

    pub fn deactivate_user(&self, user_id: Uuid) {
        if let Some(mut user) = self.users.get_mut(&user_id) {
            user.is_active = false;
        }
    }

    pub fn add_role(&self, dealership_id: Uuid, role_id: Uuid) {
        self.roles.insert(
            role_id,
            (
                dealership_id,
                RoleRow {
                    id: role_id,
                    is_active: true,
                },
            ),
        );
    }

    pub fn set_role_active(&self, role_id: Uuid, is_active: bool) {
        if let Some(mut entry) = self.roles.get_mut(&role_id) {
            entry.1.is_active = is_active;
        }
    }

    pub fn set_membership(&self, user_id: Uuid, dealership_id: Uuid, custom_role_id: Option<Uuid>) {
        self.memberships.insert(
            (user_id, dealership_id),
            MembershipRow {
                custom_role_id,
                is_active: true,
            },
        );
    }

    pub fn grant(&self, role_id: Uuid, module: AppModule, permission_key: &str) {
        self.grant_raw(role_id, module.as_str(), permission_key);
    }

    /// Grants a catalog entry by its raw module name, including names no build knows about.
    pub fn grant_raw(&self, role_id: Uuid, module: &str, permission_key: &str) {
        let mut grants = self.grants.entry(role_id).or_default();
        let row = GrantRow {
            module: module.to_string(),
            permission_key: permission_key.to_string(),
        };
        if !grants.contains(&row) {
            grants.push(row);
        }
    }

    pub fn revoke(&self, role_id: Uuid, module: AppModule, permission_key: &str) {
        if let Some(mut grants) = self.grants.get_mut(&role_id) {
            grants.retain(|g| !(g.module == module.as_str() && g.permission_key == permission_key));
        }
    }

    pub fn set_module(&self, dealership_id: Uuid, module: AppModule, is_enabled: bool) {
        self.toggles
            .entry(dealership_id)
            .or_default()
            .insert(module.as_str().to_string(), is_enabled);
    }

    pub fn enable_all_modules(&self, dealership_id: Uuid) {
        for module in AppModule::ALL {
            self.set_module(dealership_id, module, true);
        }
    }

    /// Makes every subsequent fetch fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn snapshot(&self, user_id: Uuid, dealership_id: Uuid) -> PermissionRows {
        let mut rows = PermissionRows::empty(user_id, dealership_id);

        rows.user = self.users.get(&user_id).map(|u| u.clone());
        rows.membership = self
            .memberships
            .get(&(user_id, dealership_id))
            .map(|m| m.clone());

        rows.role = rows
            .membership
            .as_ref()
            .and_then(|m| m.custom_role_id)
            .and_then(|role_id| self.roles.get(&role_id))
            .filter(|entry| entry.0 == dealership_id)
            .map(|entry| entry.1.clone());

        if let Some(role) = &rows.role {
            rows.grants = self
                .grants
                .get(&role.id)
                .map(|g| g.clone())
                .unwrap_or_default();
        }

        rows.toggles = self
            .toggles
            .get(&dealership_id)
            .map(|t| {
                t.iter()
                    .map(|(module, is_enabled)| ToggleRow {
                        module: module.clone(),
                        is_enabled: *is_enabled,
                    })
                    .collect()
            })
            .unwrap_or_default();

        rows
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PermissionStore for InMemoryPermissionStore {
    async fn fetch_rows(
        &self,
        user_id: Uuid,
        dealership_id: Uuid,
    ) -> Result<PermissionRows, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let rows = if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Connection("store unavailable".to_string()))
        } else {
            Ok(self.snapshot(user_id, dealership_id))
        };

        // rows are read before the delay, like a query whose result is still in transit
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        rows
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("store unavailable".to_string()));
        }
        Ok(())
    }
}
