//! Module, permission level and resolved permission set types.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use utoipa::ToSchema;
use uuid::Uuid;

/// Top-level functional area of the dealership application.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum AppModule {
    Dashboard,
    SalesOrders,
    ServiceOrders,
    ReconOrders,
    CarWash,
    GetReady,
    Stock,
    DetailHub,
    Productivity,
    Chat,
    Contacts,
    Reports,
    Users,
    Dealerships,
    Management,
    Settings,
}

impl AppModule {
    pub const ALL: [AppModule; 16] = [
        AppModule::Dashboard,
        AppModule::SalesOrders,
        AppModule::ServiceOrders,
        AppModule::ReconOrders,
        AppModule::CarWash,
        AppModule::GetReady,
        AppModule::Stock,
        AppModule::DetailHub,
        AppModule::Productivity,
        AppModule::Chat,
        AppModule::Contacts,
        AppModule::Reports,
        AppModule::Users,
        AppModule::Dealerships,
        AppModule::Management,
        AppModule::Settings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppModule::Dashboard => "dashboard",
            AppModule::SalesOrders => "sales_orders",
            AppModule::ServiceOrders => "service_orders",
            AppModule::ReconOrders => "recon_orders",
            AppModule::CarWash => "car_wash",
            AppModule::GetReady => "get_ready",
            AppModule::Stock => "stock",
            AppModule::DetailHub => "detail_hub",
            AppModule::Productivity => "productivity",
            AppModule::Chat => "chat",
            AppModule::Contacts => "contacts",
            AppModule::Reports => "reports",
            AppModule::Users => "users",
            AppModule::Dealerships => "dealerships",
            AppModule::Management => "management",
            AppModule::Settings => "settings",
        }
    }
}

impl std::fmt::Display for AppModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown module '{0}'")]
pub struct UnknownModule(pub String);

impl std::str::FromStr for AppModule {
    type Err = UnknownModule;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AppModule::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| UnknownModule(s.to_string()))
    }
}

/// Coarse access level within a module, backed by granular permission keys.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    View,
    Edit,
    Delete,
    Admin,
}

impl PermissionLevel {
    /// Keys a role must hold in a module to exercise this level. Every key is required.
    pub fn required_keys(self) -> &'static [&'static str] {
        match self {
            PermissionLevel::View => &["view"],
            PermissionLevel::Edit => &["view", "edit"],
            PermissionLevel::Delete => &["view", "edit", "delete"],
            PermissionLevel::Admin => &["view", "edit", "delete", "admin"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionLevel::View => "view",
            PermissionLevel::Edit => "edit",
            PermissionLevel::Delete => "delete",
            PermissionLevel::Admin => "admin",
        }
    }
}

/// Platform-wide role stored on the user row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    SystemAdmin,
    Supermanager,
    User,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::SystemAdmin => "system_admin",
            UserRole::Supermanager => "supermanager",
            UserRole::User => "user",
        }
    }

    /// Roles allowed to carry `bypass_custom_roles`.
    pub fn is_elevated(&self) -> bool {
        matches!(self, UserRole::SystemAdmin | UserRole::Supermanager)
    }

    /// Unrecognised values map to the least privileged role.
    pub fn parse(value: &str) -> Self {
        match value {
            "system_admin" => UserRole::SystemAdmin,
            "supermanager" => UserRole::Supermanager,
            _ => UserRole::User,
        }
    }
}

/// Why a resolved set grants what it grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccessSource {
    /// `system_admin`: every module and key, dealership toggles ignored.
    SystemAdmin,
    /// `bypass_custom_roles`: every key of every enabled module.
    Bypass,
    /// Grants of the membership's custom role, minus disabled modules.
    CustomRole { role_id: Uuid },
    /// No membership, no role, or an inactive role.
    NoRole,
    /// The backing store could not be read; deny everything and let the caller retry.
    Unavailable,
}

/// Effective permissions of one user inside one dealership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPermissionSet {
    pub user_id: Uuid,
    pub dealership_id: Uuid,
    pub source: AccessSource,
    pub enabled_modules: HashSet<AppModule>,
    pub permissions: HashMap<AppModule, HashSet<String>>,
}

impl ResolvedPermissionSet {
    pub fn denied(user_id: Uuid, dealership_id: Uuid, source: AccessSource) -> Self {
        Self {
            user_id,
            dealership_id,
            source,
            enabled_modules: HashSet::new(),
            permissions: HashMap::new(),
        }
    }

    pub fn is_system_admin(&self) -> bool {
        matches!(self.source, AccessSource::SystemAdmin)
    }

    pub fn bypasses_custom_roles(&self) -> bool {
        matches!(self.source, AccessSource::Bypass)
    }

    pub fn is_module_enabled(&self, module: AppModule) -> bool {
        self.enabled_modules.contains(&module)
    }

    pub fn granted(&self, module: AppModule, permission_key: &str) -> bool {
        self.permissions
            .get(&module)
            .is_some_and(|keys| keys.contains(permission_key))
    }

    pub fn granted_in(&self, module: AppModule) -> bool {
        self.permissions
            .get(&module)
            .is_some_and(|keys| !keys.is_empty())
    }

    /// Number of explicit `(module, key)` grants.
    pub fn grant_count(&self) -> usize {
        self.permissions.values().map(HashSet::len).sum()
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.source, AccessSource::Unavailable)
    }
}
