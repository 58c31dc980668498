//! Dealership member handlers.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::jwt::Claims,
    error::{get_db_conn, ApiError, ApiResult},
    handlers::roles::MANAGE_ROLES,
    helpers::{require_permission, session_scope},
    pagination::{PaginationMeta, PaginationParams},
    schema::{dealer_custom_roles, dealer_memberships, users},
    AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignRoleRequest {
    /// `null` removes the custom role, leaving the member with no module access.
    pub custom_role_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MemberResponse {
    pub user_id: Uuid,
    #[schema(example = "tech@dealer.example")]
    pub email: String,
    #[schema(example = "Sam Rivera")]
    pub full_name: Option<String>,
    #[schema(example = "user")]
    pub role: String,
    pub custom_role_id: Option<Uuid>,
    #[schema(example = "carwash_only")]
    pub custom_role_name: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MembersListResponse {
    pub data: Vec<MemberResponse>,
    pub pagination: PaginationMeta,
}

type MemberRow = (
    Uuid,
    String,
    Option<String>,
    String,
    Option<Uuid>,
    Option<String>,
    bool,
);

impl From<MemberRow> for MemberResponse {
    fn from(row: MemberRow) -> Self {
        let (user_id, email, full_name, role, custom_role_id, custom_role_name, is_active) = row;
        Self {
            user_id,
            email,
            full_name,
            role,
            custom_role_id,
            custom_role_name,
            is_active,
        }
    }
}

#[utoipa::path(
    get,
    path = "/members",
    tag = "Members",
    params(PaginationParams),
    responses(
        (status = 200, description = "Members of the dealership", body = MembersListResponse),
        (status = 403, description = "Missing users.manage_roles", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_members(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(pagination): Query<PaginationParams>,
) -> ApiResult<Json<MembersListResponse>> {
    let scope = session_scope(&claims)?;
    require_permission(&state, scope, MANAGE_ROLES.0, MANAGE_ROLES.1).await?;

    let mut conn = get_db_conn(&state.db_pool)?;

    let total_count: i64 = dealer_memberships::table
        .filter(dealer_memberships::dealership_id.eq(scope.dealership_id))
        .count()
        .get_result(&mut conn)
        .map_err(|_| ApiError::db_error())?;

    let rows: Vec<MemberRow> = dealer_memberships::table
        .inner_join(users::table)
        .left_join(dealer_custom_roles::table)
        .filter(dealer_memberships::dealership_id.eq(scope.dealership_id))
        .order((users::email.asc(), users::id.asc()))
        .limit(pagination.limit())
        .offset(pagination.offset())
        .select((
            users::id,
            users::email,
            users::full_name,
            users::role,
            dealer_memberships::custom_role_id,
            dealer_custom_roles::role_name.nullable(),
            dealer_memberships::is_active,
        ))
        .load(&mut conn)
        .map_err(|_| ApiError::db_error())?;

    Ok(Json(MembersListResponse {
        data: rows.into_iter().map(MemberResponse::from).collect(),
        pagination: pagination.into_metadata(total_count),
    }))
}

#[utoipa::path(
    put,
    path = "/members/{user_id}/role",
    tag = "Members",
    params(("user_id" = Uuid, Path, description = "Member user ID")),
    request_body = AssignRoleRequest,
    responses(
        (status = 200, description = "Role assigned", body = MemberResponse),
        (status = 403, description = "Missing users.manage_roles", body = ApiError),
        (status = 404, description = "Member or role not found in this dealership", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn assign_member_role(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<AssignRoleRequest>,
) -> ApiResult<Json<MemberResponse>> {
    let scope = session_scope(&claims)?;
    require_permission(&state, scope, MANAGE_ROLES.0, MANAGE_ROLES.1).await?;

    let mut conn = get_db_conn(&state.db_pool)?;

    if let Some(role_id) = payload.custom_role_id {
        let exists: i64 = dealer_custom_roles::table
            .filter(dealer_custom_roles::id.eq(role_id))
            .filter(dealer_custom_roles::dealership_id.eq(scope.dealership_id))
            .count()
            .get_result(&mut conn)
            .map_err(|_| ApiError::db_error())?;

        if exists == 0 {
            return Err(ApiError::not_found(
                "Role not found in this dealership",
                "ROLE_NOT_FOUND",
            ));
        }
    }

    let updated = diesel::update(
        dealer_memberships::table
            .filter(dealer_memberships::user_id.eq(user_id))
            .filter(dealer_memberships::dealership_id.eq(scope.dealership_id)),
    )
    .set(dealer_memberships::custom_role_id.eq(payload.custom_role_id))
    .execute(&mut conn)
    .map_err(|_| ApiError::db_error())?;

    if updated == 0 {
        return Err(ApiError::not_found(
            "User is not a member of this dealership",
            "MEMBER_NOT_FOUND",
        ));
    }

    let row: MemberRow = dealer_memberships::table
        .inner_join(users::table)
        .left_join(dealer_custom_roles::table)
        .filter(dealer_memberships::user_id.eq(user_id))
        .filter(dealer_memberships::dealership_id.eq(scope.dealership_id))
        .select((
            users::id,
            users::email,
            users::full_name,
            users::role,
            dealer_memberships::custom_role_id,
            dealer_custom_roles::role_name.nullable(),
            dealer_memberships::is_active,
        ))
        .first(&mut conn)
        .map_err(|_| ApiError::db_error())?;

    state.sessions.reload_user(user_id, scope.dealership_id).await;

    info!(
        user_id = %user_id,
        dealership_id = %scope.dealership_id,
        custom_role_id = ?payload.custom_role_id,
        "Assigned custom role to member"
    );

    Ok(Json(MemberResponse::from(row)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_response_from_row() {
        let user_id = Uuid::new_v4();
        let role_id = Uuid::new_v4();
        let response = MemberResponse::from((
            user_id,
            "tech@dealer.example".to_string(),
            None,
            "user".to_string(),
            Some(role_id),
            Some("carwash_only".to_string()),
            true,
        ));

        assert_eq!(response.user_id, user_id);
        assert_eq!(response.custom_role_id, Some(role_id));
        assert_eq!(response.custom_role_name.as_deref(), Some("carwash_only"));
    }
}
