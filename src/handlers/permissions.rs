//! Module permission catalog and custom role grants.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use diesel::prelude::*;
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::jwt::Claims,
    error::{get_db_conn, ApiError, ApiResult},
    handlers::roles::MANAGE_ROLES,
    helpers::{require_permission, session_scope},
    models::{ModulePermission, NewRoleModulePermission},
    permissions::{types::UnknownModule, AppModule},
    schema::{dealer_custom_roles, module_permissions, role_module_permissions},
    AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct GrantPermissionRequest {
    #[schema(example = "car_wash")]
    pub module: String,
    #[schema(example = "create_orders")]
    pub permission_key: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CatalogResponse {
    pub data: Vec<ModulePermission>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RolePermissionsResponse {
    pub role_id: Uuid,
    pub data: Vec<ModulePermission>,
}

fn ensure_role_in_dealership(
    conn: &mut PgConnection,
    role_id: Uuid,
    dealership_id: Uuid,
) -> ApiResult<()> {
    let exists: i64 = dealer_custom_roles::table
        .filter(dealer_custom_roles::id.eq(role_id))
        .filter(dealer_custom_roles::dealership_id.eq(dealership_id))
        .count()
        .get_result(conn)
        .map_err(|_| ApiError::db_error())?;

    if exists == 0 {
        return Err(ApiError::not_found(
            "Role not found in this dealership",
            "ROLE_NOT_FOUND",
        ));
    }
    Ok(())
}

#[utoipa::path(
    get,
    path = "/module-permissions",
    tag = "Permissions",
    responses(
        (status = 200, description = "Every (module, permission_key) pair that can be granted", body = CatalogResponse),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_catalog(State(state): State<AppState>) -> ApiResult<Json<CatalogResponse>> {
    let mut conn = get_db_conn(&state.db_pool)?;

    let data: Vec<ModulePermission> = module_permissions::table
        .order((
            module_permissions::module.asc(),
            module_permissions::permission_key.asc(),
        ))
        .select(ModulePermission::as_select())
        .load(&mut conn)
        .map_err(|_| ApiError::db_error())?;

    Ok(Json(CatalogResponse { data }))
}

#[utoipa::path(
    get,
    path = "/roles/{role_id}/permissions",
    tag = "Permissions",
    params(("role_id" = Uuid, Path, description = "Custom role ID")),
    responses(
        (status = 200, description = "Grants of the role", body = RolePermissionsResponse),
        (status = 403, description = "Missing users.manage_roles", body = ApiError),
        (status = 404, description = "Role not found in this dealership", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_role_permissions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(role_id): Path<Uuid>,
) -> ApiResult<Json<RolePermissionsResponse>> {
    let scope = session_scope(&claims)?;
    require_permission(&state, scope, MANAGE_ROLES.0, MANAGE_ROLES.1).await?;

    let mut conn = get_db_conn(&state.db_pool)?;
    ensure_role_in_dealership(&mut conn, role_id, scope.dealership_id)?;

    let data: Vec<ModulePermission> = role_module_permissions::table
        .inner_join(module_permissions::table)
        .filter(role_module_permissions::role_id.eq(role_id))
        .order((
            module_permissions::module.asc(),
            module_permissions::permission_key.asc(),
        ))
        .select(ModulePermission::as_select())
        .load(&mut conn)
        .map_err(|_| ApiError::db_error())?;

    Ok(Json(RolePermissionsResponse { role_id, data }))
}

#[utoipa::path(
    post,
    path = "/roles/{role_id}/permissions",
    tag = "Permissions",
    params(("role_id" = Uuid, Path, description = "Custom role ID")),
    request_body = GrantPermissionRequest,
    responses(
        (status = 201, description = "Permission granted", body = ModulePermission),
        (status = 400, description = "Unknown module", body = ApiError),
        (status = 403, description = "Missing users.manage_roles", body = ApiError),
        (status = 404, description = "Role or catalog entry not found", body = ApiError),
        (status = 409, description = "Already granted", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn grant_permission(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(role_id): Path<Uuid>,
    Json(payload): Json<GrantPermissionRequest>,
) -> ApiResult<(StatusCode, Json<ModulePermission>)> {
    let scope = session_scope(&claims)?;
    require_permission(&state, scope, MANAGE_ROLES.0, MANAGE_ROLES.1).await?;

    let module: AppModule = payload
        .module
        .parse()
        .map_err(|e: UnknownModule| {
            ApiError::bad_request(e.to_string(), "UNKNOWN_MODULE")
        })?;

    let mut conn = get_db_conn(&state.db_pool)?;
    ensure_role_in_dealership(&mut conn, role_id, scope.dealership_id)?;

    let permission: ModulePermission = module_permissions::table
        .filter(module_permissions::module.eq(module.as_str()))
        .filter(module_permissions::permission_key.eq(&payload.permission_key))
        .select(ModulePermission::as_select())
        .first(&mut conn)
        .optional()
        .map_err(|_| ApiError::db_error())?
        .ok_or_else(|| {
            ApiError::not_found(
                format!("No catalog entry {}.{}", module, payload.permission_key),
                "PERMISSION_NOT_FOUND",
            )
        })?;

    diesel::insert_into(role_module_permissions::table)
        .values(&NewRoleModulePermission {
            role_id,
            permission_id: permission.id,
        })
        .execute(&mut conn)
        .map_err(|e| {
            warn!(error = %e, role_id = %role_id, "Failed to grant permission");
            ApiError::from_insert(&e, "Permission already granted", "ALREADY_GRANTED")
        })?;

    state.sessions.reload_dealership(scope.dealership_id).await;

    info!(role_id = %role_id, module = %module, permission_key = %permission.permission_key, "Granted permission to role");
    Ok((StatusCode::CREATED, Json(permission)))
}

#[utoipa::path(
    delete,
    path = "/roles/{role_id}/permissions/{permission_id}",
    tag = "Permissions",
    params(
        ("role_id" = Uuid, Path, description = "Custom role ID"),
        ("permission_id" = Uuid, Path, description = "Catalog entry ID")
    ),
    responses(
        (status = 204, description = "Permission revoked"),
        (status = 403, description = "Missing users.manage_roles", body = ApiError),
        (status = 404, description = "Role not found or permission not granted", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn revoke_permission(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((role_id, permission_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    let scope = session_scope(&claims)?;
    require_permission(&state, scope, MANAGE_ROLES.0, MANAGE_ROLES.1).await?;

    let mut conn = get_db_conn(&state.db_pool)?;
    ensure_role_in_dealership(&mut conn, role_id, scope.dealership_id)?;

    let deleted = diesel::delete(
        role_module_permissions::table
            .filter(role_module_permissions::role_id.eq(role_id))
            .filter(role_module_permissions::permission_id.eq(permission_id)),
    )
    .execute(&mut conn)
    .map_err(|_| ApiError::internal("Failed to revoke permission", "DELETE_FAILED"))?;

    if deleted == 0 {
        return Err(ApiError::not_found(
            "Permission is not granted to this role",
            "PERMISSION_NOT_GRANTED",
        ));
    }

    state.sessions.reload_dealership(scope.dealership_id).await;

    info!(role_id = %role_id, permission_id = %permission_id, "Revoked permission from role");
    Ok(StatusCode::NO_CONTENT)
}
