//! Permission engine: resolution, caching, guards and per-session context.

pub mod coalesce;
pub mod guard;
pub mod refresh;
pub mod resolver;
pub mod service;
pub mod session;
pub mod snapshot;
pub mod types;

pub use guard::PermissionGuard;
pub use refresh::{RefreshError, RefreshLimiter, RefreshPolicy};
pub use service::{Generation, PermissionService};
pub use session::{spawn_idle_sweeper, PermissionSession, SessionPolicy, SessionRegistry};
pub use snapshot::{PermissionSnapshot, CACHE_VERSION};
pub use types::{AccessSource, AppModule, PermissionLevel, ResolvedPermissionSet, UserRole};
