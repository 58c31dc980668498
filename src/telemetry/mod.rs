//! Observability: tracing, metrics, and OpenTelemetry integration.

pub mod metrics;
pub mod tracing;

pub use metrics::{
    record_cache_lookup, record_permission_check, record_refresh, record_resolution,
    CacheOutcome, MetricsState,
};
pub use tracing::init_telemetry;
