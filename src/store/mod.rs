//! Role and permission storage.
//!
//! The resolver never queries storage itself. A store hands back every row needed for one
//! `(user_id, dealership_id)` pair in a single call, so resolution cost does not grow with
//! the number of modules.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::permissions::types::UserRole;

pub use memory::InMemoryPermissionStore;
pub use postgres::PgPermissionStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    pub role: UserRole,
    pub bypass_custom_roles: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipRow {
    pub custom_role_id: Option<Uuid>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRow {
    pub id: Uuid,
    pub is_active: bool,
}

/// A `(module, permission_key)` catalog entry granted to the role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRow {
    pub module: String,
    pub permission_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleRow {
    pub module: String,
    pub is_enabled: bool,
}

/// Everything the resolver needs for one user inside one dealership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRows {
    pub user_id: Uuid,
    pub dealership_id: Uuid,
    pub user: Option<UserRow>,
    pub membership: Option<MembershipRow>,
    pub role: Option<RoleRow>,
    pub grants: Vec<GrantRow>,
    pub toggles: Vec<ToggleRow>,
}

impl PermissionRows {
    pub fn empty(user_id: Uuid, dealership_id: Uuid) -> Self {
        Self {
            user_id,
            dealership_id,
            user: None,
            membership: None,
            role: None,
            grants: Vec::new(),
            toggles: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database connection error: {0}")]
    Connection(String),
    #[error("database query failed: {0}")]
    Query(String),
    #[error("store task failed: {0}")]
    Task(String),
}

#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Fetches user, membership, role, grants and module toggles in one batched lookup.
    async fn fetch_rows(
        &self,
        user_id: Uuid,
        dealership_id: Uuid,
    ) -> Result<PermissionRows, StoreError>;

    /// Cheapest round trip that proves the store can answer.
    async fn ping(&self) -> Result<(), StoreError>;
}
