//! Custom role management handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
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
    helpers::{require_permission, session_scope},
    models::{CustomRole, NewCustomRole},
    pagination::{PaginationMeta, PaginationParams},
    permissions::AppModule,
    schema::dealer_custom_roles,
    AppState,
};

pub(crate) const MANAGE_ROLES: (AppModule, &str) = (AppModule::Users, "manage_roles");

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRoleRequest {
    #[schema(example = "carwash_only")]
    pub role_name: String,
    #[schema(example = "Car Wash Only")]
    pub display_name: String,
    #[schema(example = "Attendants who only work the wash bay")]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateRoleRequest {
    #[schema(example = "Car Wash Crew")]
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RoleResponse {
    pub role: CustomRole,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RolesListResponse {
    pub data: Vec<CustomRole>,
    pub pagination: PaginationMeta,
}

fn validate_role_name(name: &str) -> ApiResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(ApiError::bad_request(
            "role_name must be 1-64 lowercase letters, digits or underscores",
            "INVALID_ROLE_NAME",
        ))
    }
}

#[utoipa::path(
    post,
    path = "/roles",
    tag = "Roles",
    request_body = CreateRoleRequest,
    responses(
        (status = 201, description = "Role created", body = RoleResponse),
        (status = 400, description = "Invalid role name", body = ApiError),
        (status = 403, description = "Missing users.manage_roles", body = ApiError),
        (status = 409, description = "Role name already used in this dealership", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateRoleRequest>,
) -> ApiResult<(StatusCode, Json<RoleResponse>)> {
    let scope = session_scope(&claims)?;
    require_permission(&state, scope, MANAGE_ROLES.0, MANAGE_ROLES.1).await?;
    validate_role_name(&payload.role_name)?;

    let mut conn = get_db_conn(&state.db_pool)?;

    let role: CustomRole = diesel::insert_into(dealer_custom_roles::table)
        .values(&NewCustomRole {
            dealership_id: scope.dealership_id,
            role_name: payload.role_name.clone(),
            display_name: payload.display_name,
            description: payload.description,
        })
        .returning(CustomRole::as_returning())
        .get_result(&mut conn)
        .map_err(|e| {
            warn!(error = %e, role_name = %payload.role_name, "Failed to create role");
            ApiError::from_insert(&e, "Role already exists in this dealership", "ROLE_EXISTS")
        })?;

    info!(role_id = %role.id, role_name = %role.role_name, dealership_id = %scope.dealership_id, "Created custom role");

    Ok((StatusCode::CREATED, Json(RoleResponse { role })))
}

#[utoipa::path(
    get,
    path = "/roles",
    tag = "Roles",
    params(PaginationParams),
    responses(
        (status = 200, description = "Roles in creation order", body = RolesListResponse),
        (status = 403, description = "Missing users.manage_roles", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_roles(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(pagination): Query<PaginationParams>,
) -> ApiResult<Json<RolesListResponse>> {
    let scope = session_scope(&claims)?;
    require_permission(&state, scope, MANAGE_ROLES.0, MANAGE_ROLES.1).await?;

    let mut conn = get_db_conn(&state.db_pool)?;

    let total_count: i64 = dealer_custom_roles::table
        .filter(dealer_custom_roles::dealership_id.eq(scope.dealership_id))
        .count()
        .get_result(&mut conn)
        .map_err(|_| ApiError::db_error())?;

    let roles: Vec<CustomRole> = dealer_custom_roles::table
        .filter(dealer_custom_roles::dealership_id.eq(scope.dealership_id))
        .order((
            dealer_custom_roles::created_at.asc(),
            dealer_custom_roles::id.asc(),
        ))
        .limit(pagination.limit())
        .offset(pagination.offset())
        .select(CustomRole::as_select())
        .load(&mut conn)
        .map_err(|_| ApiError::db_error())?;

    Ok(Json(RolesListResponse {
        data: roles,
        pagination: pagination.into_metadata(total_count),
    }))
}

#[utoipa::path(
    put,
    path = "/roles/{role_id}",
    tag = "Roles",
    params(("role_id" = Uuid, Path, description = "Custom role ID")),
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "Role updated", body = RoleResponse),
        (status = 400, description = "Nothing to update", body = ApiError),
        (status = 403, description = "Missing users.manage_roles", body = ApiError),
        (status = 404, description = "Role not found in this dealership", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_role(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(role_id): Path<Uuid>,
    Json(payload): Json<UpdateRoleRequest>,
) -> ApiResult<Json<RoleResponse>> {
    let scope = session_scope(&claims)?;
    require_permission(&state, scope, MANAGE_ROLES.0, MANAGE_ROLES.1).await?;

    if payload.display_name.is_none() && payload.description.is_none() && payload.is_active.is_none() {
        return Err(ApiError::bad_request(
            "At least one of display_name, description or is_active must be provided",
            "NO_FIELDS_TO_UPDATE",
        ));
    }

    let mut conn = get_db_conn(&state.db_pool)?;

    let role: CustomRole = conn
        .transaction::<_, diesel::result::Error, _>(|conn| {
            let target = || {
                dealer_custom_roles::table
                    .filter(dealer_custom_roles::id.eq(role_id))
                    .filter(dealer_custom_roles::dealership_id.eq(scope.dealership_id))
            };

            if let Some(display_name) = &payload.display_name {
                diesel::update(target())
                    .set(dealer_custom_roles::display_name.eq(display_name))
                    .execute(conn)?;
            }
            if let Some(description) = &payload.description {
                diesel::update(target())
                    .set(dealer_custom_roles::description.eq(description))
                    .execute(conn)?;
            }
            if let Some(is_active) = payload.is_active {
                diesel::update(target())
                    .set(dealer_custom_roles::is_active.eq(is_active))
                    .execute(conn)?;
            }

            target().select(CustomRole::as_select()).first(conn)
        })
        .map_err(|e| match e {
            diesel::result::Error::NotFound => {
                ApiError::not_found("Role not found in this dealership", "ROLE_NOT_FOUND")
            }
            _ => ApiError::db_error(),
        })?;

    if payload.is_active.is_some() {
        state.sessions.reload_dealership(scope.dealership_id).await;
    }

    info!(role_id = %role_id, dealership_id = %scope.dealership_id, "Updated custom role");

    Ok(Json(RoleResponse { role }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_name_validation() {
        assert!(validate_role_name("carwash_only").is_ok());
        assert!(validate_role_name("bdc2").is_ok());
        assert!(validate_role_name("").is_err());
        assert!(validate_role_name("Car Wash").is_err());
        assert!(validate_role_name(&"a".repeat(65)).is_err());
    }
}
