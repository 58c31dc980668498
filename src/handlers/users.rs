//! Platform-level user settings.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::jwt::Claims,
    error::{get_db_conn, ApiError, ApiResult},
    helpers::session_scope,
    models::User,
    permissions::UserRole,
    schema::users,
    AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetBypassRequest {
    pub bypass_custom_roles: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BypassResponse {
    pub user_id: Uuid,
    pub role: UserRole,
    pub bypass_custom_roles: bool,
}

/// Only elevated roles may carry the flag. Clearing it is always allowed.
fn check_bypass_allowed(role: UserRole, bypass: bool) -> ApiResult<()> {
    if bypass && !role.is_elevated() {
        return Err(ApiError::bad_request(
            "bypass_custom_roles is only allowed for system_admin and supermanager users",
            "BYPASS_NOT_ALLOWED",
        ));
    }
    Ok(())
}

#[utoipa::path(
    put,
    path = "/users/{user_id}/bypass",
    tag = "Users",
    params(("user_id" = Uuid, Path, description = "Target user ID")),
    request_body = SetBypassRequest,
    responses(
        (status = 200, description = "Bypass flag updated", body = BypassResponse),
        (status = 400, description = "Target role cannot bypass custom roles", body = ApiError),
        (status = 403, description = "Caller is not a system admin", body = ApiError),
        (status = 404, description = "User not found", body = ApiError),
        (status = 503, description = "Permissions unavailable", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn set_bypass(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<SetBypassRequest>,
) -> ApiResult<Json<BypassResponse>> {
    let scope = session_scope(&claims)?;
    let guard = state.sessions.guard(scope.user_id, scope.dealership_id).await;

    if guard.set().is_retryable() {
        return Err(ApiError::unavailable(
            "Permissions are temporarily unavailable",
            "PERMISSIONS_UNAVAILABLE",
        ));
    }
    if !guard.set().is_system_admin() {
        warn!(caller = %scope.user_id, target = %user_id, "Non-admin attempted to change bypass flag");
        return Err(ApiError::forbidden(
            "Only system admins can change bypass_custom_roles",
            "SYSTEM_ADMIN_REQUIRED",
        ));
    }

    let mut conn = get_db_conn(&state.db_pool)?;

    let user: User = users::table
        .find(user_id)
        .select(User::as_select())
        .first(&mut conn)
        .optional()
        .map_err(|_| ApiError::db_error())?
        .ok_or_else(|| ApiError::not_found("User not found", "USER_NOT_FOUND"))?;

    let role = UserRole::parse(&user.role);
    check_bypass_allowed(role, payload.bypass_custom_roles)?;

    diesel::update(users::table.find(user_id))
        .set((
            users::bypass_custom_roles.eq(payload.bypass_custom_roles),
            users::updated_at.eq(diesel::dsl::now),
        ))
        .execute(&mut conn)
        .map_err(|_| ApiError::db_error())?;

    state.sessions.reload_user_everywhere(user_id).await;

    info!(
        user_id = %user_id,
        bypass_custom_roles = payload.bypass_custom_roles,
        changed_by = %scope.user_id,
        "Bypass flag updated"
    );

    Ok(Json(BypassResponse {
        user_id,
        role,
        bypass_custom_roles: payload.bypass_custom_roles,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bypass_requires_elevated_role() {
        assert!(check_bypass_allowed(UserRole::Supermanager, true).is_ok());
        assert!(check_bypass_allowed(UserRole::SystemAdmin, true).is_ok());

        let (status, body) = check_bypass_allowed(UserRole::User, true).unwrap_err();
        assert_eq!(status, axum::http::StatusCode::BAD_REQUEST);
        assert_eq!(body.code, "BYPASS_NOT_ALLOWED");
    }

    #[test]
    fn test_clearing_bypass_is_always_allowed() {
        assert!(check_bypass_allowed(UserRole::User, false).is_ok());
    }
}
