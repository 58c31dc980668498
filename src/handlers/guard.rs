//! Permission checks for the calling user inside their dealership.
//!
//! Denials are answers, not errors: every check returns `200` with `allowed: false`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::jwt::Claims,
    error::{ApiError, ApiResult},
    helpers::{get_user_id, session_scope},
    middleware::rate_limit::RateLimitExceeded,
    permissions::{
        AccessSource, AppModule, PermissionGuard, PermissionLevel, PermissionSnapshot,
        CACHE_VERSION,
    },
    telemetry::record_permission_check,
    AppState,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct MyPermissionsResponse {
    pub user_id: Uuid,
    pub dealership_id: Uuid,
    pub source: AccessSource,
    #[schema(example = 4)]
    pub cache_version: u32,
    pub enabled_modules: Vec<AppModule>,
    #[schema(value_type = Vec<Vec<String>>, example = json!([["car_wash", "view"]]))]
    pub permissions: Vec<(AppModule, String)>,
    /// True when the permission store could not be read; everything is denied until a retry.
    pub retryable: bool,
}

impl MyPermissionsResponse {
    fn from_guard(guard: &PermissionGuard) -> Self {
        let snapshot = PermissionSnapshot::from_set(guard.set(), 0);
        Self {
            user_id: snapshot.user_id,
            dealership_id: snapshot.dealership_id,
            source: snapshot.source,
            cache_version: CACHE_VERSION,
            enabled_modules: snapshot.enabled_modules,
            permissions: snapshot.permissions,
            retryable: guard.set().is_retryable(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CheckPermissionRequest {
    #[schema(example = "car_wash")]
    pub module: String,
    #[schema(example = "create_orders")]
    pub permission_key: Option<String>,
    pub level: Option<PermissionLevel>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckPermissionResponse {
    #[schema(example = "car_wash")]
    pub module: String,
    #[schema(example = "create_orders")]
    pub permission_key: Option<String>,
    pub level: Option<PermissionLevel>,
    pub allowed: bool,
    #[schema(example = "granted_by_role")]
    pub reason: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckPermissionsBulkRequest {
    pub checks: Vec<CheckPermissionRequest>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckPermissionsBulkResponse {
    pub results: Vec<CheckPermissionResponse>,
    pub all_allowed: bool,
    /// `module.permission_key` (or `module:level`) of every denied check.
    pub denied: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ModuleAccessResponse {
    #[schema(example = "get_ready")]
    pub module: String,
    pub allowed: bool,
    #[schema(example = "module_disabled")]
    pub reason: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LogoutResponse {
    pub sessions_closed: usize,
}

fn reason(guard: &PermissionGuard, module: Option<AppModule>, allowed: bool) -> &'static str {
    let set = guard.set();
    let Some(module) = module else {
        return "unknown_module";
    };

    match set.source {
        AccessSource::Unavailable => "unavailable",
        AccessSource::SystemAdmin => "system_admin",
        _ if !set.is_module_enabled(module) => "module_disabled",
        AccessSource::Bypass => "bypass",
        AccessSource::NoRole => "no_role",
        AccessSource::CustomRole { .. } if allowed => "granted_by_role",
        AccessSource::CustomRole { .. } => "not_granted",
    }
}

fn run_check(
    guard: &PermissionGuard,
    check: CheckPermissionRequest,
) -> Result<CheckPermissionResponse, crate::error::ApiErrorResponse> {
    let module = check.module.parse::<AppModule>().ok();

    let allowed = match (module, check.permission_key.as_deref(), check.level) {
        (_, None, None) => {
            return Err(ApiError::bad_request(
                "Either 'permission_key' or 'level' must be provided",
                "INVALID_REQUEST",
            ))
        }
        (None, _, _) => false,
        (Some(m), Some(key), level) => {
            guard.has_permission(m, key) && level.is_none_or(|l| guard.has_level(m, l))
        }
        (Some(m), None, Some(level)) => guard.has_level(m, level),
    };

    record_permission_check(module, allowed);

    Ok(CheckPermissionResponse {
        reason: reason(guard, module, allowed).to_string(),
        module: check.module,
        permission_key: check.permission_key,
        level: check.level,
        allowed,
    })
}

#[utoipa::path(
    get,
    path = "/me/permissions",
    tag = "Guard",
    responses(
        (status = 200, description = "Resolved permissions of the caller", body = MyPermissionsResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 403, description = "Dealership-scoped token required", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn my_permissions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<MyPermissionsResponse>> {
    let scope = session_scope(&claims)?;
    let guard = state.sessions.guard(scope.user_id, scope.dealership_id).await;
    Ok(Json(MyPermissionsResponse::from_guard(&guard)))
}

#[utoipa::path(
    post,
    path = "/me/permissions/check",
    tag = "Guard",
    request_body = CheckPermissionRequest,
    responses(
        (status = 200, description = "Check result", body = CheckPermissionResponse),
        (status = 400, description = "Neither permission_key nor level given", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn check_permission(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CheckPermissionRequest>,
) -> ApiResult<Json<CheckPermissionResponse>> {
    let scope = session_scope(&claims)?;
    let guard = state.sessions.guard(scope.user_id, scope.dealership_id).await;
    Ok(Json(run_check(&guard, payload)?))
}

#[utoipa::path(
    post,
    path = "/me/permissions/check-bulk",
    tag = "Guard",
    request_body = CheckPermissionsBulkRequest,
    responses(
        (status = 200, description = "Bulk check results", body = CheckPermissionsBulkResponse),
        (status = 400, description = "Empty or malformed checks", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn check_permissions_bulk(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CheckPermissionsBulkRequest>,
) -> ApiResult<Json<CheckPermissionsBulkResponse>> {
    let scope = session_scope(&claims)?;

    if payload.checks.is_empty() {
        return Err(ApiError::bad_request(
            "At least one check must be provided",
            "INVALID_REQUEST",
        ));
    }

    let guard = state.sessions.guard(scope.user_id, scope.dealership_id).await;

    let mut results = Vec::with_capacity(payload.checks.len());
    let mut denied = Vec::new();
    for check in payload.checks {
        let result = run_check(&guard, check)?;
        if !result.allowed {
            denied.push(match (&result.permission_key, result.level) {
                (Some(key), _) => format!("{}.{}", result.module, key),
                (None, Some(level)) => format!("{}:{}", result.module, level.as_str()),
                (None, None) => result.module.clone(),
            });
        }
        results.push(result);
    }

    Ok(Json(CheckPermissionsBulkResponse {
        all_allowed: denied.is_empty(),
        results,
        denied,
    }))
}

#[utoipa::path(
    get,
    path = "/me/modules/{module}",
    tag = "Guard",
    params(("module" = String, Path, description = "Module name, e.g. get_ready")),
    responses(
        (status = 200, description = "Module access", body = ModuleAccessResponse),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn module_access(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(module_name): Path<String>,
) -> ApiResult<Json<ModuleAccessResponse>> {
    let scope = session_scope(&claims)?;
    let guard = state.sessions.guard(scope.user_id, scope.dealership_id).await;

    let module = module_name.parse::<AppModule>().ok();
    let allowed = module.is_some_and(|m| guard.has_module_access(m));
    record_permission_check(module, allowed);

    Ok(Json(ModuleAccessResponse {
        reason: reason(&guard, module, allowed).to_string(),
        module: module_name,
        allowed,
    }))
}

#[utoipa::path(
    post,
    path = "/me/permissions/refresh",
    tag = "Guard",
    responses(
        (status = 200, description = "Freshly resolved permissions", body = MyPermissionsResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 429, description = "Refreshed too recently; see Retry-After")
    ),
    security(("bearer_auth" = []))
)]
pub async fn refresh_permissions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MyPermissionsResponse>, Response> {
    let scope = session_scope(&claims).map_err(IntoResponse::into_response)?;

    let guard = state
        .sessions
        .refresh(scope.user_id, scope.dealership_id)
        .await
        .map_err(|e| {
            RateLimitExceeded {
                error: "Permissions were refreshed too recently".to_string(),
                retry_after_secs: e.retry_after_secs(),
            }
            .into_response()
        })?;

    info!(user_id = %scope.user_id, dealership_id = %scope.dealership_id, "Permissions refreshed");
    Ok(Json(MyPermissionsResponse::from_guard(&guard)))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Guard",
    responses(
        (status = 200, description = "Permission sessions closed", body = LogoutResponse),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<(StatusCode, Json<LogoutResponse>)> {
    let user_id = get_user_id(&claims)?;

    let sessions_closed = match session_scope(&claims) {
        Ok(scope) => usize::from(state.sessions.close(user_id, scope.dealership_id).await),
        Err(_) => state.sessions.close_user(user_id).await,
    };

    info!(user_id = %user_id, sessions_closed, "User logged out");
    Ok((StatusCode::OK, Json(LogoutResponse { sessions_closed })))
}
