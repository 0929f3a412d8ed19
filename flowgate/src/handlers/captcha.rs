//! `/api/v1/captcha` handlers
//!
//! The verification providers themselves are external; these endpoints
//! expose the provider selection to the frontend and deposit validated
//! tokens into the process-wide token table that login redeems.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::response::{ApiResponse, ApiResult};
use super::ValidJson;
use crate::captcha;
use crate::error::Result;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct TurnstileRequest {
    pub token: String,
}

/// Whether login requires a captcha token (1) or not (0)
pub async fn check(State(state): State<AppState>) -> ApiResult<i32> {
    let enabled = state.configs().value_or("captcha_enabled", "false").await? == "true";
    Ok(ApiResponse::ok(i32::from(enabled)))
}

/// Describe the configured provider to the frontend
pub async fn generate(State(state): State<AppState>) -> Result<Json<Value>> {
    let captcha_type = state.configs().value_or("captcha_type", "turnstile").await?;

    let data = if captcha_type == "turnstile" {
        let site_key = state.configs().value_or("turnstile_site_key", "").await?;
        json!({ "captchaType": "TURNSTILE", "siteKey": site_key })
    } else {
        json!({ "captchaType": captcha_type.to_uppercase() })
    };

    Ok(Json(json!({ "success": true, "data": data })))
}

/// Local-provider verification: the external widget already judged the
/// human; mint the single-use login token.
pub async fn verify(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<VerifyRequest>,
) -> Result<Json<Value>> {
    if req.id.is_empty() {
        return Ok(Json(json!({ "success": false, "message": "参数错误" })));
    }

    let token = state.captcha.issue();
    Ok(Json(json!({ "success": true, "data": { "validToken": token } })))
}

/// Cloudflare Turnstile verification
pub async fn verify_turnstile(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<TurnstileRequest>,
) -> Result<Json<Value>> {
    let secret_key = state.configs().value_or("turnstile_secret_key", "").await?;
    if secret_key.is_empty() {
        return Ok(Json(json!({ "success": false, "message": "未配置Turnstile密钥" })));
    }

    let verifier = captcha::TurnstileVerifier::new(state.http.clone(), secret_key);
    match captcha::redeem_verification(&verifier, &state.captcha, &req.token).await? {
        Some(token) => Ok(Json(json!({ "success": true, "data": { "validToken": token } }))),
        None => Ok(Json(json!({ "success": false, "message": "验证失败" }))),
    }
}
