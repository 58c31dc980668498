//! Liveness, readiness and status of the permission service.
//!
//! Readiness covers what a permission check needs: the permission store, the cache backend
//! and the database behind the admin endpoints. A disabled cache is not a failure.

use axum::{extract::State, http::StatusCode, Json};
use diesel::prelude::*;
use serde::Serialize;
use std::time::Instant;
use utoipa::ToSchema;

use crate::cache::CacheError;
use crate::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "healthy")]
    pub status: String,
    #[schema(example = "dealergate")]
    pub service: String,
    #[schema(example = "0.1.0")]
    pub version: String,
    #[schema(example = "redis")]
    pub cache_backend: String,
    /// Permission sessions currently held in this process.
    #[schema(example = 42)]
    pub open_sessions: usize,
    #[schema(example = "2024-01-15T10:30:00Z")]
    pub timestamp: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReadinessResponse {
    #[schema(example = "ready")]
    pub status: String,
    pub checks: ReadinessChecks,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReadinessChecks {
    pub database: ComponentStatus,
    pub permission_store: ComponentStatus,
    pub permission_cache: CacheStatus,
}

impl ReadinessChecks {
    fn is_ready(&self) -> bool {
        self.database.is_up()
            && self.permission_store.is_up()
            && self.permission_cache.status != "down"
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ComponentStatus {
    #[schema(example = "up")]
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = 5)]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "Connection refused")]
    pub error: Option<String>,
}

impl ComponentStatus {
    fn from_result<E: std::fmt::Display>(result: Result<(), E>, start: Instant) -> Self {
        match result {
            Ok(()) => Self {
                status: "up".to_string(),
                latency_ms: Some(start.elapsed().as_millis() as u64),
                error: None,
            },
            Err(e) => Self {
                status: "down".to_string(),
                latency_ms: None,
                error: Some(e.to_string()),
            },
        }
    }

    fn is_up(&self) -> bool {
        self.status == "up"
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CacheStatus {
    #[schema(example = "redis")]
    pub backend: String,
    /// `up`, `down` or `disabled`.
    #[schema(example = "up")]
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CacheStatus {
    fn new(backend: &str, result: Result<(), CacheError>) -> Self {
        let (status, error) = match result {
            Ok(()) => ("up", None),
            Err(CacheError::Disabled) => ("disabled", None),
            Err(e) => ("down", Some(e.to_string())),
        };
        Self {
            backend: backend.to_string(),
            status: status.to_string(),
            error,
        }
    }
}

#[utoipa::path(
    get,
    path = "/health/status",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "dealergate".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cache_backend: state.permissions.cache().backend_name().to_string(),
        open_sessions: state.sessions.len(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Simple health check", content_type = "text/plain")
    )
)]
pub async fn health_check_simple() -> &'static str {
    "OK"
}

#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Service is ready", body = ReadinessResponse),
        (status = 503, description = "Service is not ready", body = ReadinessResponse)
    )
)]
pub async fn ready_check(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let start = Instant::now();
    let database = ComponentStatus::from_result(ping_database(&state).await, start);

    let start = Instant::now();
    let permission_store =
        ComponentStatus::from_result(state.permissions.ping_store().await, start);

    let cache = state.permissions.cache();
    let permission_cache = CacheStatus::new(cache.backend_name(), cache.ping().await);

    let checks = ReadinessChecks {
        database,
        permission_store,
        permission_cache,
    };
    let ready = checks.is_ready();
    let response = ReadinessResponse {
        status: if ready { "ready" } else { "not_ready" }.to_string(),
        checks,
    };

    if ready {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}

async fn ping_database(state: &AppState) -> Result<(), String> {
    let pool = state.db_pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| format!("Failed to get connection: {}", e))?;
        diesel::sql_query("SELECT 1")
            .execute(&mut conn)
            .map(|_| ())
            .map_err(|e| format!("Query failed: {}", e))
    })
    .await
    .map_err(|e| format!("Health check task failed: {}", e))?
}

#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Service is alive")
    )
)]
pub async fn live_check() -> StatusCode {
    StatusCode::OK
}
