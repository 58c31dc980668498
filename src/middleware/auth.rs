//! Authentication middleware.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::debug;

use crate::auth::jwt::Claims;
use crate::middleware::request_id::record_caller;
use crate::AppState;

fn reject(status: StatusCode, error: &str, code: &str) -> Response {
    (status, Json(json!({"error": error, "code": code}))).into_response()
}

/// Validates JWT access tokens and stores claims in request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, Response> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            reject(
                StatusCode::UNAUTHORIZED,
                "Missing authorization header",
                "MISSING_AUTH_HEADER",
            )
        })?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        reject(
            StatusCode::UNAUTHORIZED,
            "Invalid authorization header format",
            "INVALID_AUTH_FORMAT",
        )
    })?;

    let claims = state.jwt_config.verify_access_token(token).map_err(|e| {
        debug!(error = %e, "Access token rejected");
        reject(
            StatusCode::UNAUTHORIZED,
            "Invalid or expired token",
            "INVALID_TOKEN",
        )
    })?;

    if claims.user_id().is_none() {
        return Err(reject(
            StatusCode::UNAUTHORIZED,
            "Invalid token subject",
            "INVALID_TOKEN",
        ));
    }

    record_caller(&claims.sub, claims.dealership_id.as_deref());
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Requires a dealership context in the token.
pub async fn dealership_auth_middleware(req: Request, next: Next) -> Result<Response, Response> {
    let has_dealership = req
        .extensions()
        .get::<Claims>()
        .and_then(|c| c.dealership_id.as_deref())
        .is_some_and(|id| uuid::Uuid::parse_str(id).is_ok());

    if has_dealership {
        Ok(next.run(req).await)
    } else {
        Err(reject(
            StatusCode::FORBIDDEN,
            "Dealership context required. Request a token scoped to a dealership.",
            "DEALERSHIP_CONTEXT_REQUIRED",
        ))
    }
}
