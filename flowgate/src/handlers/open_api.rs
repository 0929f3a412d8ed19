//! Public subscription endpoint (`/open_api/sub_store`)
//!
//! Authenticates by username and MD5(password) and answers with the
//! `subscription-userinfo` header clients expect: `upload` carries the
//! downloaded bytes, `download` the uploaded bytes, `total` the quota
//! in bytes and `expire` the Unix-seconds expiry.

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::Result;
use crate::models::BYTES_PER_GB;
use crate::service::users::password_digest;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubStoreQuery {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pwd: String,
    #[serde(default = "default_tunnel")]
    pub tunnel: String,
}

fn default_tunnel() -> String {
    "-1".to_string()
}

fn denied(msg: &str) -> Response {
    Json(json!({ "code": 1, "msg": msg })).into_response()
}

#[must_use]
pub fn subscription_header(upload: i64, download: i64, total: i64, expire_secs: i64) -> String {
    format!("upload={upload}; download={download}; total={total}; expire={expire_secs}")
}

pub async fn sub_store(
    State(state): State<AppState>,
    Query(query): Query<SubStoreQuery>,
) -> Result<Response> {
    if query.user.is_empty() {
        return Ok(denied("用户不能为空"));
    }
    if query.pwd.is_empty() {
        return Ok(denied("密码不能为空"));
    }

    let Some(user) = state.users().find_by_username(&query.user).await? else {
        return Ok(denied("鉴权失败"));
    };
    if user.pwd != password_digest(&query.pwd) {
        return Ok(denied("鉴权失败"));
    }

    let header = if query.tunnel == "-1" {
        subscription_header(
            user.in_flow,
            user.out_flow,
            user.flow * BYTES_PER_GB,
            user.exp_time / 1000,
        )
    } else {
        let Ok(grant_id) = query.tunnel.parse::<i64>() else {
            return Ok(denied("隧道不存在"));
        };
        let Some(grant) = state.user_tunnels().find_by_id(grant_id).await? else {
            return Ok(denied("隧道不存在"));
        };
        if grant.user_id != user.id {
            return Ok(denied("隧道不存在"));
        }
        subscription_header(
            grant.in_flow,
            grant.out_flow,
            grant.flow * BYTES_PER_GB,
            grant.exp_time / 1000,
        )
    };

    Ok(([("subscription-userinfo", header.clone())], header).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_header_format() {
        assert_eq!(
            subscription_header(100, 200, 1 << 30, 1_700_000_000),
            "upload=100; download=200; total=1073741824; expire=1700000000"
        );
    }
}
