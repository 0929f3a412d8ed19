//! Uniform operator-API response envelope
//!
//! Every business response is HTTP 200 with `{code, msg, ts, data?}`;
//! `code` 0 means success, anything else carries a domain message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// Handler result: a typed envelope or a crate error rendered by
/// [`crate::error::Error::into_response`]
pub type ApiResult<T> = Result<ApiResponse<T>, crate::error::Error>;

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Success with payload
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self {
            code: 0,
            msg: "操作成功".to_string(),
            ts: chrono::Utc::now().timestamp_millis(),
            data: Some(data),
        }
    }

    /// Success with payload and custom message
    #[must_use]
    pub fn ok_msg(msg: impl Into<String>, data: T) -> Self {
        Self {
            code: 0,
            msg: msg.into(),
            ts: chrono::Utc::now().timestamp_millis(),
            data: Some(data),
        }
    }

    /// Business failure with the default error code
    #[must_use]
    pub fn error(msg: impl Into<String>) -> Self {
        Self::error_with_code(-1, msg)
    }

    /// Business failure with an explicit code
    #[must_use]
    pub fn error_with_code(code: i32, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
            ts: chrono::Utc::now().timestamp_millis(),
            data: None,
        }
    }
}

impl ApiResponse<()> {
    /// Success without payload
    #[must_use]
    pub fn success() -> Self {
        Self {
            code: 0,
            msg: "操作成功".to_string(),
            ts: chrono::Utc::now().timestamp_millis(),
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_envelope() {
        let response = ApiResponse::ok(42);
        assert_eq!(response.code, 0);
        assert_eq!(response.data, Some(42));
        assert!(response.ts > 0);
    }

    #[test]
    fn test_error_envelope() {
        let response = ApiResponse::<()>::error("boom");
        assert_eq!(response.code, -1);
        assert_eq!(response.msg, "boom");
        assert!(response.data.is_none());
    }

    #[test]
    fn test_data_omitted_when_none() {
        let text = serde_json::to_string(&ApiResponse::<()>::success()).unwrap();
        assert!(!text.contains("data"));
        assert!(text.contains("\"code\":0"));
    }
}
