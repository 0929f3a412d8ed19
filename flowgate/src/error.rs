//! Error types and HTTP response conversion
//!
//! The operator API surfaces every business failure as HTTP 200 with a
//! `{code, msg, ts}` envelope; only authentication failures use a real
//! 401 status. The session layer has its own small error set that maps
//! onto the downstream variants here.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::handlers::response::ApiResponse;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by a node session while exchanging frames with an agent
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No live session exists for the node
    #[error("node not connected")]
    NodeNotConnected,

    /// The outbound queue did not accept the frame within the send deadline
    #[error("send timeout")]
    SendTimeout,

    /// The agent did not answer the correlated request within the deadline
    #[error("response timeout")]
    ResponseTimeout,

    /// The session terminated while the request was in flight
    #[error("connection closed")]
    ConnectionClosed,

    /// Frame could not be encoded, encrypted or decrypted
    #[error("codec error: {0}")]
    Codec(String),
}

/// Main error type for the control plane
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Malformed JSON or missing required field
    #[error("参数错误")]
    Validation,

    /// Domain-level bad request; the message surfaces to the caller
    #[error("{0}")]
    BadRequest(String),

    /// Missing/invalid credentials or insufficient role
    #[error("{0}")]
    Unauthorized(String),

    /// Domain entity missing on lookup
    #[error("{0}")]
    NotFound(String),

    /// State conflict (duplicate name, port collision, existing grant)
    #[error("{0}")]
    Conflict(String),

    /// The port allocator found no free port in the node's range
    #[error("无可用端口")]
    NoFreePort,

    /// A node session operation failed
    #[error("{0}")]
    Session(#[from] SessionError),

    /// An agent acknowledged a request with a failure message
    #[error("{0}")]
    Agent(String),

    /// JWT error
    #[error("JWT error: {0}")]
    Jwt(Box<jsonwebtoken::errors::Error>),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convenience constructor for not-found errors
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Convenience constructor for conflict errors
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Convenience constructor for bad-request errors
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Error::Jwt(Box::new(err))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                Json(ApiResponse::<()>::error_with_code(401, msg)),
            )
                .into_response(),

            Error::Jwt(e) => (
                StatusCode::UNAUTHORIZED,
                Json(ApiResponse::<()>::error_with_code(401, e.to_string())),
            )
                .into_response(),

            Error::Validation => {
                Json(ApiResponse::<()>::error("参数错误".to_string())).into_response()
            }

            Error::Database(e) => {
                tracing::error!(error = %e, "database error");
                Json(ApiResponse::<()>::error("数据库操作失败".to_string())).into_response()
            }

            Error::Config(e) => {
                tracing::error!(error = %e, "configuration error");
                Json(ApiResponse::<()>::error_with_code(
                    500,
                    "服务器内部错误".to_string(),
                ))
                .into_response()
            }

            Error::Io(e) => {
                tracing::error!(error = %e, "I/O error");
                Json(ApiResponse::<()>::error_with_code(
                    500,
                    "服务器内部错误".to_string(),
                ))
                .into_response()
            }

            Error::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                Json(ApiResponse::<()>::error_with_code(
                    500,
                    "服务器内部错误".to_string(),
                ))
                .into_response()
            }

            // Domain errors (bad request, not found, conflict, capacity,
            // downstream) carry their operator-facing message as-is
            other => Json(ApiResponse::<()>::error(other.to_string())).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_messages() {
        assert_eq!(
            SessionError::NodeNotConnected.to_string(),
            "node not connected"
        );
        assert_eq!(SessionError::SendTimeout.to_string(), "send timeout");
        assert_eq!(
            SessionError::ResponseTimeout.to_string(),
            "response timeout"
        );
        assert_eq!(
            SessionError::ConnectionClosed.to_string(),
            "connection closed"
        );
    }

    #[test]
    fn test_no_free_port_message() {
        assert_eq!(Error::NoFreePort.to_string(), "无可用端口");
    }

    #[test]
    fn test_validation_is_generic_but_bad_request_is_not() {
        assert_eq!(Error::Validation.to_string(), "参数错误");
        assert_eq!(
            Error::bad_request("账号已停用").to_string(),
            "账号已停用"
        );
    }

    #[test]
    fn test_session_error_promotes() {
        let err: Error = SessionError::NodeNotConnected.into();
        assert!(matches!(err, Error::Session(_)));
    }
}
