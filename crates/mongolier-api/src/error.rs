//! API error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mongolier_common::MongolierError;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors surfaced by views and resources
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Method \"{0}\" not allowed.")]
    MethodNotAllowed(String),

    /// The database stayed unreachable for every retry
    #[error("Database unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::NotFound(_) => 404,
            ApiError::MethodNotAllowed(_) => 405,
            ApiError::Internal(_) => 500,
            ApiError::Unavailable(_) => 503,
        }
    }

    /// The `{"detail": ...}` body sent to clients
    pub fn detail(&self) -> String {
        match self {
            // Driver internals stay in the logs
            ApiError::Internal(_) => "Internal server error.".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<MongolierError> for ApiError {
    fn from(err: MongolierError) -> Self {
        if err.is_auto_reconnect() {
            return ApiError::Unavailable(err.to_string());
        }
        if err.is_duplicate_key() {
            return ApiError::BadRequest("An object with this id already exists.".to_string());
        }
        match err {
            MongolierError::NotFound(msg) => ApiError::NotFound(msg),
            MongolierError::Validation(msg) | MongolierError::Deserialization(msg) => {
                ApiError::BadRequest(msg)
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        match &self {
            ApiError::Internal(msg) => error!(error = %msg, "Request failed"),
            ApiError::Unavailable(msg) => warn!(error = %msg, "Database unavailable"),
            _ => {}
        }

        (status, Json(json!({ "detail": self.detail() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::BadRequest("x".into()).status_code(), 400);
        assert_eq!(ApiError::NotFound("x".into()).status_code(), 404);
        assert_eq!(ApiError::MethodNotAllowed("PUT".into()).status_code(), 405);
        assert_eq!(ApiError::Internal("x".into()).status_code(), 500);
        assert_eq!(ApiError::Unavailable("x".into()).status_code(), 503);
    }

    #[test]
    fn test_from_mongolier_error() {
        let err: ApiError = MongolierError::Validation("bad field".into()).into();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let err: ApiError = MongolierError::NotFound("gone".into()).into();
        assert!(matches!(err, ApiError::NotFound(_)));

        let err: ApiError = MongolierError::Configuration("no alias".into()).into();
        assert!(matches!(err, ApiError::Internal(_)));
        assert_eq!(err.detail(), "Internal server error.");
    }

    #[test]
    fn test_reconnect_failure_is_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err: ApiError = MongolierError::from(mongodb::error::Error::from(io)).into();
        assert!(matches!(err, ApiError::Unavailable(_)));
    }

    #[test]
    fn test_method_not_allowed_message() {
        assert_eq!(
            ApiError::MethodNotAllowed("DELETE".into()).detail(),
            "Method \"DELETE\" not allowed."
        );
    }
}
