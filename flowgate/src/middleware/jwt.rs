//! JWT issuing, validation and the authentication middleware
//!
//! Operator tokens are HS256 with claims `{sub, user, role_id, exp, iat}`.
//! The `Authorization` header is accepted with or without a `Bearer `
//! prefix. Admin-only routes additionally require `role_id == 0`.

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::JwtConfig;
use crate::error::{Error, Result};
use crate::models::User;
use crate::state::AppState;

/// Operator token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: i64,
    /// Username
    pub user: String,
    /// Role id (0 admin, 1 regular)
    pub role_id: i32,
    /// Expiration (Unix seconds)
    pub exp: i64,
    /// Issued at (Unix seconds)
    pub iat: i64,
}

impl Claims {
    /// Whether the token carries the administrator role
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role_id == User::ROLE_ADMIN
    }
}

/// Issue a token for an authenticated user
pub fn issue_token(config: &JwtConfig, user: &User) -> Result<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user.id,
        user: user.user.clone(),
        role_id: user.role_id,
        exp: (now + Duration::hours(config.expire_hours)).timestamp(),
        iat: now.timestamp(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )?;
    Ok(token)
}

/// Validate a token and return its claims
pub fn decode_token(config: &JwtConfig, token: &str) -> Result<Claims> {
    let token = token.strip_prefix("Bearer ").unwrap_or(token);
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

/// Middleware: validate the bearer token and inject [`Claims`]
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response> {
    let header = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Unauthorized("未登录或token已过期".to_string()))?;

    let claims = decode_token(&state.config.jwt, header)
        .map_err(|_| Error::Unauthorized("无效的token或token已过期".to_string()))?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// Middleware: reject tokens without the administrator role.
/// Must run after [`require_auth`].
pub async fn require_admin(request: Request<Body>, next: Next) -> Result<Response> {
    let claims = request
        .extensions()
        .get::<Claims>()
        .ok_or_else(|| Error::Unauthorized("无权限访问".to_string()))?;

    if !claims.is_admin() {
        return Err(Error::Unauthorized("无权限访问".to_string()));
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user() -> User {
        User {
            id: 42,
            user: "operator".to_string(),
            pwd: String::new(),
            role_id: User::ROLE_ADMIN,
            exp_time: 0,
            flow: 0,
            in_flow: 0,
            out_flow: 0,
            num: 0,
            flow_reset_time: 0,
            status: User::STATUS_ENABLED,
            created_time: 0,
            updated_time: 0,
        }
    }

    fn test_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret".to_string(),
            expire_hours: 1,
        }
    }

    #[test]
    fn test_issue_and_decode() {
        let config = test_config();
        let token = issue_token(&config, &test_user()).unwrap();
        let claims = decode_token(&config, &token).unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.user, "operator");
        assert!(claims.is_admin());
    }

    #[test]
    fn test_bearer_prefix_accepted() {
        let config = test_config();
        let token = issue_token(&config, &test_user()).unwrap();
        let claims = decode_token(&config, &format!("Bearer {token}")).unwrap();
        assert_eq!(claims.sub, 42);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let config = test_config();
        let token = issue_token(&config, &test_user()).unwrap();
        let other = JwtConfig {
            secret: "different".to_string(),
            expire_hours: 1,
        };
        assert!(decode_token(&other, &token).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(decode_token(&test_config(), "not-a-token").is_err());
    }
}
