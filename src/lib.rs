//! Dealergate - per-dealership module permissions with cached resolution and guarded HTTP access.

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod helpers;
pub mod middleware;
pub mod models;
pub mod openapi;
pub mod pagination;
pub mod permissions;
pub mod schema;
pub mod store;
pub mod telemetry;

use axum::{
    http::StatusCode,
    middleware as axum_middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};

use diesel::r2d2::{self, ConnectionManager};
use diesel::PgConnection;
use std::sync::Arc;
use std::time::Duration;

use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use auth::jwt::{JwtConfig, KeyError};
use cache::{build_permission_cache, PermissionCache};
use middleware::{
    metrics::metrics_middleware,
    rate_limit::{rate_limit_middleware, RateLimitConfig, RateLimitState},
    request_id::request_id_middleware,
};
use permissions::{PermissionService, RefreshLimiter, RefreshPolicy, SessionPolicy, SessionRegistry};
use store::{PermissionStore, PgPermissionStore};
use telemetry::MetricsState;

pub type DbPool = r2d2::Pool<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub permissions: Arc<PermissionService>,
    pub sessions: Arc<SessionRegistry>,
    pub rate_limit: RateLimitState,
    pub jwt_config: Arc<JwtConfig>,
    pub metrics: MetricsState,
}

impl AppState {
    /// Production wiring: Postgres-backed permission store, signing key from the environment.
    pub fn new(
        db_pool: DbPool,
        redis_pool: Option<deadpool_redis::Pool>,
        config: &Config,
    ) -> Result<Self, KeyError> {
        let jwt_config = JwtConfig::from_env(&config.jwt)?;
        let store = Arc::new(PgPermissionStore::new(db_pool.clone()));
        let cache = build_permission_cache(&config.permissions, redis_pool);

        Ok(Self::with_store(db_pool, store, cache, jwt_config, config))
    }

    pub fn with_store(
        db_pool: DbPool,
        store: Arc<dyn PermissionStore>,
        cache: PermissionCache,
        jwt_config: JwtConfig,
        config: &Config,
    ) -> Self {
        let rate_limit = if config.security.rate_limiting_enabled {
            RateLimitState::with_config(RateLimitConfig::new(
                config.security.rate_limit_requests_per_minute,
                60,
            ))
        } else {
            RateLimitState::disabled()
        };

        let limiter = RefreshLimiter::new(&RefreshPolicy::from(&config.permissions));
        let permissions = Arc::new(PermissionService::new(store, cache, limiter));
        let sessions = Arc::new(SessionRegistry::new(
            Arc::clone(&permissions),
            SessionPolicy::from(&config.permissions),
        ));

        Self {
            db_pool,
            permissions,
            sessions,
            rate_limit,
            jwt_config: Arc::new(jwt_config),
            metrics: MetricsState::new(config.telemetry.metrics_enabled),
        }
    }
}

pub fn create_router(state: AppState, config: &config::Config) -> Router {
    let cors = build_cors_layer(config);
    let body_limit = RequestBodyLimitLayer::new(config.server.max_body_size);

    #[allow(deprecated)]
    let timeout = TimeoutLayer::new(Duration::from_secs(config.server.request_timeout_secs));

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let rate_limit_state = state.rate_limit.clone();

    let metrics_state = state.metrics.clone();
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check_simple))
        .route("/health/status", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::ready_check))
        .route("/health/live", get(handlers::health::live_check))
        .route(
            "/metrics",
            get(telemetry::metrics::metrics_handler).with_state(metrics_state),
        )
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/logout", post(handlers::guard::logout))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ))
        .with_state(state.clone());

    let dealership_routes = Router::new()
        .route("/me/permissions", get(handlers::guard::my_permissions))
        .route(
            "/me/permissions/check",
            post(handlers::guard::check_permission),
        )
        .route(
            "/me/permissions/check-bulk",
            post(handlers::guard::check_permissions_bulk),
        )
        .route(
            "/me/permissions/refresh",
            post(handlers::guard::refresh_permissions),
        )
        .route("/me/modules/{module}", get(handlers::guard::module_access))
        .route("/roles", post(handlers::roles::create_role))
        .route("/roles", get(handlers::roles::list_roles))
        .route("/roles/{role_id}", put(handlers::roles::update_role))
        .route(
            "/module-permissions",
            get(handlers::permissions::list_catalog),
        )
        .route(
            "/roles/{role_id}/permissions",
            get(handlers::permissions::list_role_permissions),
        )
        .route(
            "/roles/{role_id}/permissions",
            post(handlers::permissions::grant_permission),
        )
        .route(
            "/roles/{role_id}/permissions/{permission_id}",
            delete(handlers::permissions::revoke_permission),
        )
        .route("/members", get(handlers::members::list_members))
        .route(
            "/members/{user_id}/role",
            put(handlers::members::assign_member_role),
        )
        .route("/modules", get(handlers::modules::list_modules))
        .route("/modules/{module}", put(handlers::modules::set_module))
        .route("/users/{user_id}/bypass", put(handlers::users::set_bypass))
        .layer(axum_middleware::from_fn(
            middleware::auth::dealership_auth_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ))
        .with_state(state.clone());

    let docs_routes = openapi::swagger_router();

    Router::new()
        .merge(docs_routes)
        .merge(public_routes)
        .merge(protected_routes)
        .merge(dealership_routes)
        .fallback(fallback_handler)
        .layer(axum_middleware::from_fn(metrics_middleware))
        .layer(axum_middleware::from_fn(rate_limit_middleware))
        .layer(axum::Extension(rate_limit_state))
        .layer(axum_middleware::from_fn(request_id_middleware))
        .layer(trace_layer)
        .layer(timeout)
        .layer(body_limit)
        .layer(cors)
}

async fn fallback_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "Not found", "code": "NOT_FOUND"})),
    )
}

fn build_cors_layer(config: &config::Config) -> CorsLayer {
    use axum::http::header::HeaderName;
    use axum::http::Method;

    let is_wildcard_origin = config.cors.allowed_origins.contains(&"*".to_string())
        || config.cors.allowed_origins.is_empty();

    let methods: Vec<Method> = config
        .cors
        .allowed_methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();

    let headers: Vec<HeaderName> = config
        .cors
        .allowed_headers
        .iter()
        .filter_map(|h| h.parse().ok())
        .collect();

    if config.cors.allow_credentials && is_wildcard_origin {
        CorsLayer::new()
            .allow_origin(tower_http::cors::AllowOrigin::mirror_request())
            .allow_methods(methods)
            .allow_headers(headers)
            .allow_credentials(true)
            .max_age(Duration::from_secs(config.cors.max_age_secs))
    } else if config.cors.allow_credentials {
        let origins: Vec<_> = config
            .cors
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(headers)
            .allow_credentials(true)
            .max_age(Duration::from_secs(config.cors.max_age_secs))
    } else {
        let cors = if is_wildcard_origin {
            CorsLayer::new().allow_origin(Any)
        } else {
            let origins: Vec<_> = config
                .cors
                .allowed_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new().allow_origin(origins)
        };

        cors.allow_methods(methods)
            .allow_headers(headers)
            .allow_credentials(false)
            .max_age(Duration::from_secs(config.cors.max_age_secs))
    }
}

pub fn create_db_pool(config: &config::Config) -> Result<DbPool, r2d2::PoolError> {
    let manager = ConnectionManager::<PgConnection>::new(&config.database.url);
    r2d2::Pool::builder()
        .max_size(config.database.max_connections)
        .min_idle(Some(config.database.min_connections))
        .connection_timeout(Duration::from_secs(config.database.connection_timeout_secs))
        .idle_timeout(Some(Duration::from_secs(config.database.idle_timeout_secs)))
        .build(manager)
}

/// Pool that opens no connection until one is requested.
pub fn create_lazy_db_pool(config: &config::Config) -> DbPool {
    let manager = ConnectionManager::<PgConnection>::new(&config.database.url);
    r2d2::Pool::builder()
        .max_size(config.database.max_connections)
        .min_idle(Some(0))
        .connection_timeout(Duration::from_secs(config.database.connection_timeout_secs))
        .build_unchecked(manager)
}

pub fn init_tracing(config: &config::Config) {
    telemetry::init_telemetry(config);
}

pub use telemetry::tracing::shutdown_telemetry;

pub use config::Config;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn test_build_cors_layer_wildcard() {
        let mut config = Config::default_for_testing();
        config.cors.allowed_origins = vec!["*".to_string()];
        let _ = build_cors_layer(&config);
    }

    #[test]
    fn test_build_cors_layer_specific_origins() {
        let mut config = Config::default_for_testing();
        config.cors.allowed_origins = vec![
            "http://localhost:3000".to_string(),
            "https://example.com".to_string(),
        ];
        let _ = build_cors_layer(&config);
    }
}
