//! Shared helper functions for handlers.

use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::auth::jwt::Claims;
use crate::error::{ApiError, ApiErrorResponse};
use crate::permissions::{AppModule, PermissionGuard};
use crate::AppState;

/// The `(user, dealership)` pair a dealership-scoped request acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionScope {
    pub user_id: Uuid,
    pub dealership_id: Uuid,
}

pub fn get_user_id(claims: &Claims) -> Result<Uuid, ApiErrorResponse> {
    claims
        .user_id()
        .ok_or_else(|| ApiError::unauthorized("Invalid token subject", "INVALID_TOKEN"))
}

pub fn get_dealership_id(claims: &Claims) -> Result<Uuid, ApiErrorResponse> {
    claims
        .dealership_id
        .as_ref()
        .and_then(|id| Uuid::parse_str(id).ok())
        .ok_or_else(|| {
            ApiError::bad_request("Invalid dealership context", "INVALID_DEALERSHIP_CONTEXT")
        })
}

pub fn session_scope(claims: &Claims) -> Result<SessionScope, ApiErrorResponse> {
    Ok(SessionScope {
        user_id: get_user_id(claims)?,
        dealership_id: get_dealership_id(claims)?,
    })
}

/// Opens (or reuses) the caller's permission session and requires `module.permission_key`.
pub async fn require_permission(
    state: &AppState,
    scope: SessionScope,
    module: AppModule,
    permission_key: &str,
) -> Result<Arc<PermissionGuard>, ApiErrorResponse> {
    let guard = state
        .sessions
        .guard(scope.user_id, scope.dealership_id)
        .await;

    if guard.set().is_retryable() {
        return Err(ApiError::unavailable(
            "Permissions are temporarily unavailable",
            "PERMISSIONS_UNAVAILABLE",
        ));
    }

    if !guard.has_permission(module, permission_key) {
        debug!(
            user_id = %scope.user_id,
            dealership_id = %scope.dealership_id,
            module = %module,
            permission_key,
            "Permission denied"
        );
        return Err(ApiError::forbidden(
            format!("Missing permission {}.{}", module, permission_key),
            "PERMISSION_DENIED",
        ));
    }

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(sub: &str, dealership_id: Option<&str>) -> Claims {
        Claims {
            sub: sub.to_string(),
            email: "a@example.com".to_string(),
            dealership_id: dealership_id.map(str::to_string),
            exp: 0,
            iat: 0,
        }
    }

    #[test]
    fn test_session_scope_requires_both_ids() {
        let user = Uuid::new_v4();
        let dealer = Uuid::new_v4();

        let scope = session_scope(&claims(&user.to_string(), Some(&dealer.to_string()))).unwrap();
        assert_eq!(scope.user_id, user);
        assert_eq!(scope.dealership_id, dealer);

        assert!(session_scope(&claims(&user.to_string(), None)).is_err());
        assert!(session_scope(&claims("not-a-uuid", Some(&dealer.to_string()))).is_err());
        assert!(get_dealership_id(&claims(&user.to_string(), Some("nope"))).is_err());
    }
}
