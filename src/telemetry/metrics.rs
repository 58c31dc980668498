//! Prometheus metrics for permission resolution, cache and guard traffic.

use axum::{http::StatusCode, response::IntoResponse};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

use crate::permissions::types::{AccessSource, AppModule};

static PROMETHEUS_HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

#[derive(Clone)]
pub struct MetricsState {
    handle: Option<PrometheusHandle>,
}

impl MetricsState {
    pub fn new(enabled: bool) -> Self {
        if !enabled {
            return Self { handle: None };
        }

        let handle = PROMETHEUS_HANDLE
            .get_or_init(|| PrometheusBuilder::new().install_recorder().ok())
            .clone();

        if handle.is_none() {
            tracing::warn!("Prometheus recorder could not be installed, metrics disabled");
        }

        Self { handle }
    }

    pub fn disabled() -> Self {
        Self { handle: None }
    }

    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(|h| h.render())
    }

    pub fn is_enabled(&self) -> bool {
        self.handle.is_some()
    }
}

pub async fn metrics_handler(
    axum::extract::State(state): axum::extract::State<MetricsState>,
) -> impl IntoResponse {
    match state.render() {
        Some(metrics) => (StatusCode::OK, metrics),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Metrics not enabled".to_string(),
        ),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
    Expired,
    /// Written under another `CACHE_VERSION`.
    Stale,
    Corrupt,
}

impl CacheOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Miss => "miss",
            CacheOutcome::Expired => "expired",
            CacheOutcome::Stale => "stale",
            CacheOutcome::Corrupt => "corrupt",
        }
    }
}

fn source_label(source: &AccessSource) -> &'static str {
    match source {
        AccessSource::SystemAdmin => "system_admin",
        AccessSource::Bypass => "bypass",
        AccessSource::CustomRole { .. } => "custom_role",
        AccessSource::NoRole => "no_role",
        AccessSource::Unavailable => "unavailable",
    }
}

fn module_label(module: Option<AppModule>) -> &'static str {
    module.map(|m| m.as_str()).unwrap_or("unknown")
}

pub fn record_cache_lookup(outcome: CacheOutcome) {
    counter!(
        "permission_cache_lookups_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

pub fn record_resolution(source: &AccessSource, cached: bool, duration: std::time::Duration) {
    counter!(
        "permission_resolutions_total",
        "source" => source_label(source),
        "cached" => cached.to_string()
    )
    .increment(1);

    histogram!(
        "permission_resolution_duration_seconds",
        "cached" => cached.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Modules the service does not know are counted under `"unknown"`.
pub fn record_permission_check(module: Option<AppModule>, granted: bool) {
    counter!(
        "permission_checks_total",
        "module" => module_label(module),
        "granted" => granted.to_string()
    )
    .increment(1);
}

pub fn record_refresh(allowed: bool) {
    counter!(
        "permission_refreshes_total",
        "outcome" => if allowed { "allowed" } else { "rate_limited" }
    )
    .increment(1);
}

pub fn record_request_latency(
    method: &str,
    path: &str,
    status: u16,
    duration: std::time::Duration,
) {
    histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());
}
