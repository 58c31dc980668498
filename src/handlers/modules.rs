//! Dealership module toggles.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::{
    auth::jwt::Claims,
    error::{get_db_conn, ApiError, ApiResult},
    helpers::{require_permission, session_scope},
    models::{DealerModuleToggle, NewDealerModuleToggle},
    permissions::{types::UnknownModule, AppModule},
    schema::dealership_modules,
    AppState,
};

pub(crate) const MANAGE_MODULES: (AppModule, &str) = (AppModule::Dealerships, "manage_modules");

#[derive(Debug, Deserialize, ToSchema)]
pub struct ToggleModuleRequest {
    pub is_enabled: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ModuleStatus {
    pub module: AppModule,
    pub is_enabled: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ModulesListResponse {
    pub data: Vec<ModuleStatus>,
}

/// Every module in declaration order. A module without a row is disabled.
fn module_statuses(rows: &[DealerModuleToggle]) -> Vec<ModuleStatus> {
    AppModule::ALL
        .iter()
        .map(|&module| ModuleStatus {
            module,
            is_enabled: rows
                .iter()
                .any(|r| r.module == module.as_str() && r.is_enabled),
        })
        .collect()
}

#[utoipa::path(
    get,
    path = "/modules",
    tag = "Modules",
    responses(
        (status = 200, description = "Toggle state of every module", body = ModulesListResponse),
        (status = 403, description = "Missing dealerships.manage_modules", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_modules(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<ModulesListResponse>> {
    let scope = session_scope(&claims)?;
    require_permission(&state, scope, MANAGE_MODULES.0, MANAGE_MODULES.1).await?;

    let mut conn = get_db_conn(&state.db_pool)?;

    let rows: Vec<DealerModuleToggle> = dealership_modules::table
        .filter(dealership_modules::dealership_id.eq(scope.dealership_id))
        .select(DealerModuleToggle::as_select())
        .load(&mut conn)
        .map_err(|_| ApiError::db_error())?;

    Ok(Json(ModulesListResponse {
        data: module_statuses(&rows),
    }))
}

#[utoipa::path(
    put,
    path = "/modules/{module}",
    tag = "Modules",
    params(("module" = String, Path, description = "Module name, e.g. get_ready")),
    request_body = ToggleModuleRequest,
    responses(
        (status = 200, description = "Module toggled", body = ModuleStatus),
        (status = 400, description = "Unknown module", body = ApiError),
        (status = 403, description = "Missing dealerships.manage_modules", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn set_module(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(module): Path<String>,
    Json(payload): Json<ToggleModuleRequest>,
) -> ApiResult<Json<ModuleStatus>> {
    let scope = session_scope(&claims)?;
    require_permission(&state, scope, MANAGE_MODULES.0, MANAGE_MODULES.1).await?;

    let module: AppModule = module
        .parse()
        .map_err(|e: UnknownModule| ApiError::bad_request(e.to_string(), "UNKNOWN_MODULE"))?;

    let mut conn = get_db_conn(&state.db_pool)?;

    let toggle = NewDealerModuleToggle {
        dealership_id: scope.dealership_id,
        module: module.as_str().to_string(),
        is_enabled: payload.is_enabled,
    };

    diesel::insert_into(dealership_modules::table)
        .values(&toggle)
        .on_conflict((dealership_modules::dealership_id, dealership_modules::module))
        .do_update()
        .set((
            dealership_modules::is_enabled.eq(payload.is_enabled),
            dealership_modules::updated_at.eq(diesel::dsl::now),
        ))
        .execute(&mut conn)
        .map_err(|_| ApiError::db_error())?;

    state.sessions.reload_dealership(scope.dealership_id).await;

    info!(
        dealership_id = %scope.dealership_id,
        module = %module,
        is_enabled = payload.is_enabled,
        "Module toggled"
    );

    Ok(Json(ModuleStatus {
        module,
        is_enabled: payload.is_enabled,
    }))
}
