//! Shared error handling utilities.

use axum::{http::StatusCode, Json};
use diesel::result::DatabaseErrorKind;
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

use crate::DbPool;

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    #[schema(example = "Missing permission users.manage_roles")]
    pub error: String,
    #[schema(example = "PERMISSION_DENIED")]
    pub code: String,
}

pub type ApiErrorResponse = (StatusCode, Json<ApiError>);

impl ApiError {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }

    fn with_status(
        status: StatusCode,
        error: impl Into<String>,
        code: impl Into<String>,
    ) -> ApiErrorResponse {
        (status, Json(Self::new(error, code)))
    }

    pub fn bad_request(error: impl Into<String>, code: impl Into<String>) -> ApiErrorResponse {
        Self::with_status(StatusCode::BAD_REQUEST, error, code)
    }

    pub fn unauthorized(error: impl Into<String>, code: impl Into<String>) -> ApiErrorResponse {
        Self::with_status(StatusCode::UNAUTHORIZED, error, code)
    }

    pub fn forbidden(error: impl Into<String>, code: impl Into<String>) -> ApiErrorResponse {
        Self::with_status(StatusCode::FORBIDDEN, error, code)
    }

    pub fn not_found(error: impl Into<String>, code: impl Into<String>) -> ApiErrorResponse {
        Self::with_status(StatusCode::NOT_FOUND, error, code)
    }

    pub fn conflict(error: impl Into<String>, code: impl Into<String>) -> ApiErrorResponse {
        Self::with_status(StatusCode::CONFLICT, error, code)
    }

    pub fn unavailable(error: impl Into<String>, code: impl Into<String>) -> ApiErrorResponse {
        Self::with_status(StatusCode::SERVICE_UNAVAILABLE, error, code)
    }

    pub fn internal(error: impl Into<String>, code: impl Into<String>) -> ApiErrorResponse {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, error, code)
    }

    pub fn db_error() -> ApiErrorResponse {
        Self::internal("Database error", "DB_ERROR")
    }

    /// 409 for a unique violation, 500 for any other database failure.
    pub fn from_insert(
        e: &diesel::result::Error,
        message: &str,
        code: &str,
    ) -> ApiErrorResponse {
        match e {
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                Self::conflict(message, code)
            }
            _ => {
                error!(error = %e, "Insert failed");
                Self::db_error()
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiErrorResponse>;

pub fn get_db_conn(
    pool: &DbPool,
) -> Result<
    diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<diesel::PgConnection>>,
    ApiErrorResponse,
> {
    pool.get().map_err(|e| {
        error!(error = %e, "Database connection error");
        ApiError::unavailable("Database connection error", "DB_CONNECTION_ERROR")
    })
}
