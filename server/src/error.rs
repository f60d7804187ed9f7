//! Unified error handling for the server.
//!
//! Every error leaves as a wire [`ErrorBody`] so clients classify by `code`,
//! never by message text.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use stash_engine::remote::wire::{ErrorBody, ErrorCode};

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unknown column: {0}")]
    UnknownField(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::UnknownField(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            AppError::Database(e) => {
                tracing::error!(error = ?e, "database error");
                ErrorBody::new(ErrorCode::Internal, "Database error")
            }
            AppError::UnknownField(field) => ErrorBody::unknown_field(field.as_str()),
            AppError::BadRequest(msg) => ErrorBody::new(ErrorCode::BadRequest, msg.as_str()),
            AppError::NotFound(msg) => ErrorBody::new(ErrorCode::NotFound, msg.as_str()),
            AppError::Unauthorized => ErrorBody::new(ErrorCode::Unauthorized, "Unauthorized"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_field_carries_the_column() {
        let err = AppError::UnknownField("owner_id".into());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.body(), ErrorBody::unknown_field("owner_id"));
    }

    #[test]
    fn database_errors_are_opaque() {
        let err = AppError::Database(sqlx::Error::PoolTimedOut);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.body().code, ErrorCode::Internal);
        assert_eq!(err.body().field, None);
    }

    #[test]
    fn statuses() {
        assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
    }
}
