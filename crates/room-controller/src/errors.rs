//! Room Controller error types.
//!
//! Errors map to HTTP status codes via `IntoResponse` and to WebSocket close
//! codes via [`RcError::close_code`]. Store and internal details are logged
//! server-side and never returned to clients.

use crate::protocol::CloseCode;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Room Controller error type.
///
/// Maps to numeric error codes:
/// - `Unauthorized`: 2
/// - `Forbidden`: 3
/// - `NotFound`: 4
/// - `Conflict`: 5
/// - `Store`, `Internal`: 6
/// - `Draining`: 7
/// - `InvalidInput`: 8
/// - `NotAMember`: 9
#[derive(Debug, Error)]
pub enum RcError {
    /// Room, participant, or join request absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad password or missing/invalid session.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Non-creator attempting a creator-only action.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Room full at join or approve time, or id collision.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed create or join payload.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Connection attempt by someone who is neither member nor requester.
    #[error("Not a member of this room")]
    NotAMember,

    /// Room store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Actor channel failure or other internal fault.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Controller is shutting down.
    #[error("Room controller is draining")]
    Draining,
}

impl RcError {
    /// Returns the numeric error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            RcError::Unauthorized(_) => 2,
            RcError::Forbidden(_) => 3,
            RcError::NotFound(_) => 4,
            RcError::Conflict(_) => 5,
            RcError::Store(_) | RcError::Internal(_) => 6,
            RcError::Draining => 7,
            RcError::InvalidInput(_) => 8,
            RcError::NotAMember => 9,
        }
    }

    /// Returns the HTTP status for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            RcError::NotFound(_) => StatusCode::NOT_FOUND,
            RcError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            RcError::Forbidden(_) | RcError::NotAMember => StatusCode::FORBIDDEN,
            RcError::Conflict(_) => StatusCode::CONFLICT,
            RcError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RcError::Store(_) | RcError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RcError::Draining => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Returns a client-safe message (hides store and internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RcError::Store(_) | RcError::Internal(_) => "An internal error occurred".to_string(),
            RcError::Draining => "Service is shutting down, please reconnect".to_string(),
            other => other.to_string(),
        }
    }

    /// Close code used when this error aborts a WebSocket connection.
    #[must_use]
    pub fn close_code(&self) -> CloseCode {
        match self {
            RcError::NotFound(_) => CloseCode::RoomNotFound,
            RcError::Unauthorized(_) => CloseCode::Unauthorized,
            RcError::NotAMember | RcError::Forbidden(_) => CloseCode::NotAMember,
            RcError::Draining => CloseCode::GoingAway,
            RcError::Conflict(_)
            | RcError::InvalidInput(_)
            | RcError::Store(_)
            | RcError::Internal(_) => CloseCode::InternalError,
        }
    }
}

impl From<redis::RedisError> for RcError {
    fn from(err: redis::RedisError) -> Self {
        RcError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for RcError {
    fn from(err: serde_json::Error) -> Self {
        RcError::Store(format!("serialization failed: {err}"))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: i32,
    message: String,
}

impl IntoResponse for RcError {
    fn into_response(self) -> Response {
        match &self {
            RcError::Store(err) => {
                tracing::error!(target: "rc.store", error = %err, "Store operation failed");
            }
            RcError::Internal(err) => {
                tracing::error!(target: "rc.http", error = %err, "Internal error");
            }
            _ => {}
        }

        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code(),
                message: self.client_message(),
            },
        };

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) = "Bearer realm=\"parley\"".parse() {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_error_codes() {
        assert_eq!(RcError::Unauthorized("x".into()).error_code(), 2);
        assert_eq!(RcError::Forbidden("x".into()).error_code(), 3);
        assert_eq!(RcError::NotFound("x".into()).error_code(), 4);
        assert_eq!(RcError::Conflict("x".into()).error_code(), 5);
        assert_eq!(RcError::Store("x".into()).error_code(), 6);
        assert_eq!(RcError::Internal("x".into()).error_code(), 6);
        assert_eq!(RcError::Draining.error_code(), 7);
        assert_eq!(RcError::InvalidInput("x".into()).error_code(), 8);
        assert_eq!(RcError::NotAMember.error_code(), 9);
    }

    #[test]
    fn test_client_message_hides_internal_details() {
        let err = RcError::Store("connection refused to 10.0.0.5:6379".to_string());
        assert!(!err.client_message().contains("10.0.0.5"));

        let err = RcError::Internal("channel send failed".to_string());
        assert!(!err.client_message().contains("channel"));

        let err = RcError::Conflict("room full".to_string());
        assert_eq!(err.client_message(), "Conflict: room full");
    }

    #[test]
    fn test_close_codes_disambiguate_causes() {
        assert_eq!(RcError::NotAMember.close_code(), CloseCode::NotAMember);
        assert_eq!(
            RcError::NotFound("room".into()).close_code(),
            CloseCode::RoomNotFound
        );
        assert_eq!(
            RcError::Unauthorized("token".into()).close_code(),
            CloseCode::Unauthorized
        );
        assert_ne!(
            RcError::NotAMember.close_code().as_u16(),
            RcError::NotFound("room".into()).close_code().as_u16()
        );
    }

    #[tokio::test]
    async fn test_into_response_conflict() {
        let response = RcError::Conflict("room full".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], 5);
        assert_eq!(json["error"]["message"], "Conflict: room full");
    }

    #[tokio::test]
    async fn test_into_response_unauthorized_sets_header() {
        let response = RcError::Unauthorized("bad password".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("WWW-Authenticate"));
    }

    #[tokio::test]
    async fn test_into_response_store_is_generic() {
        let response = RcError::Store("redis down".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("redis down"));
    }
}
