//! Postgres-backed permission store.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::PgConnection;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::{
    GrantRow, MembershipRow, PermissionRows, PermissionStore, RoleRow, StoreError, ToggleRow,
    UserRow,
};
use crate::permissions::types::UserRole;
use crate::schema::{
    dealer_custom_roles, dealer_memberships, dealership_modules, module_permissions,
    role_module_permissions, users,
};
use crate::DbPool;

#[derive(Clone)]
pub struct PgPermissionStore {
    pool: DbPool,
}

impl PgPermissionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Runs every lookup inside one read-only repeatable-read transaction so the rows
    /// describe a single consistent state.
    pub fn load_rows(
        conn: &mut PgConnection,
        user_id: Uuid,
        dealership_id: Uuid,
    ) -> QueryResult<PermissionRows> {
        conn.build_transaction()
            .read_only()
            .repeatable_read()
            .run(|conn| {
                let user = users::table
                    .filter(users::id.eq(user_id))
                    .select((users::role, users::bypass_custom_roles, users::is_active))
                    .first::<(String, bool, bool)>(conn)
                    .optional()?
                    .map(|(role, bypass_custom_roles, is_active)| UserRow {
                        role: UserRole::parse(&role),
                        bypass_custom_roles,
                        is_active,
                    });

                let membership = dealer_memberships::table
                    .filter(dealer_memberships::user_id.eq(user_id))
                    .filter(dealer_memberships::dealership_id.eq(dealership_id))
                    .select((
                        dealer_memberships::custom_role_id,
                        dealer_memberships::is_active,
                    ))
                    .first::<(Option<Uuid>, bool)>(conn)
                    .optional()?
                    .map(|(custom_role_id, is_active)| MembershipRow {
                        custom_role_id,
                        is_active,
                    });

                let role = match membership.as_ref().and_then(|m| m.custom_role_id) {
                    Some(role_id) => dealer_custom_roles::table
                        .filter(dealer_custom_roles::id.eq(role_id))
                        .filter(dealer_custom_roles::dealership_id.eq(dealership_id))
                        .select((dealer_custom_roles::id, dealer_custom_roles::is_active))
                        .first::<(Uuid, bool)>(conn)
                        .optional()?
                        .map(|(id, is_active)| RoleRow { id, is_active }),
                    None => None,
                };

                let grants = match role.as_ref() {
                    Some(role) => role_module_permissions::table
                        .inner_join(module_permissions::table)
                        .filter(role_module_permissions::role_id.eq(role.id))
                        .select((module_permissions::module, module_permissions::permission_key))
                        .load::<(String, String)>(conn)?
                        .into_iter()
                        .map(|(module, permission_key)| GrantRow {
                            module,
                            permission_key,
                        })
                        .collect(),
                    None => Vec::new(),
                };

                let toggles = dealership_modules::table
                    .filter(dealership_modules::dealership_id.eq(dealership_id))
                    .select((dealership_modules::module, dealership_modules::is_enabled))
                    .load::<(String, bool)>(conn)?
                    .into_iter()
                    .map(|(module, is_enabled)| ToggleRow { module, is_enabled })
                    .collect();

                Ok(PermissionRows {
                    user_id,
                    dealership_id,
                    user,
                    membership,
                    role,
                    grants,
                    toggles,
                })
            })
    }
}

#[async_trait]
impl PermissionStore for PgPermissionStore {
    #[instrument(skip(self), name = "pg_fetch_permission_rows")]
    async fn fetch_rows(
        &self,
        user_id: Uuid,
        dealership_id: Uuid,
    ) -> Result<PermissionRows, StoreError> {
        let pool = self.pool.clone();

        let rows = tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| StoreError::Connection(e.to_string()))?;
            Self::load_rows(&mut conn, user_id, dealership_id)
                .map_err(|e| StoreError::Query(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
        .inspect_err(|e| error!(error = %e, "Failed to load permission rows"))?;

        debug!(
            grants = rows.grants.len(),
            toggles = rows.toggles.len(),
            "Loaded permission rows"
        );
        Ok(rows)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| StoreError::Connection(e.to_string()))?;
            diesel::sql_query("SELECT 1")
                .execute(&mut conn)
                .map(|_| ())
                .map_err(|e| StoreError::Query(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}
