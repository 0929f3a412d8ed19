//! Account management and login

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::middleware::{jwt, Claims};
use crate::models::User;
use crate::repository::NewUser;
use crate::state::AppState;

/// The well-known bootstrap credential pair; logging in with it flags a
/// forced password change
const DEFAULT_CREDENTIAL: &str = "admin_user";

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    #[serde(rename = "captchaId", default)]
    pub captcha_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub role_id: i32,
    pub name: String,
    #[serde(rename = "requirePasswordChange")]
    pub require_password_change: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub user: String,
    pub pwd: String,
    pub flow: i64,
    pub num: i32,
    #[serde(rename = "expTime")]
    pub exp_time: i64,
    #[serde(rename = "flowResetTime")]
    pub flow_reset_time: i64,
    #[serde(default)]
    pub status: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub id: i64,
    pub user: String,
    #[serde(default)]
    pub pwd: String,
    pub flow: i64,
    pub num: i32,
    #[serde(rename = "expTime")]
    pub exp_time: i64,
    #[serde(rename = "flowResetTime")]
    pub flow_reset_time: i64,
    #[serde(default)]
    pub status: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    #[serde(rename = "newUsername")]
    pub new_username: String,
    #[serde(rename = "currentPassword")]
    pub current_password: String,
    #[serde(rename = "newPassword")]
    pub new_password: String,
    #[serde(rename = "confirmPassword")]
    pub confirm_password: String,
}

/// Reset request: type 1 zeroes the account counters, type 2 zeroes a
/// grant's counters (`id` is then the grant id)
#[derive(Debug, Deserialize)]
pub struct ResetFlowRequest {
    pub id: i64,
    #[serde(rename = "type")]
    pub reset_type: i32,
}

/// Caller's quota view
#[derive(Debug, Serialize)]
pub struct UserPackage {
    pub user: String,
    pub exp_time: i64,
    pub flow: i64,
    pub used_flow: i64,
    pub in_flow: i64,
    pub out_flow: i64,
    pub num: i32,
    pub used_num: i64,
    pub flow_reset_time: i64,
}

/// MD5 digest used for stored credentials and the open-api contract
#[must_use]
pub fn password_digest(password: &str) -> String {
    format!("{:x}", md5::compute(password))
}

#[derive(Clone)]
pub struct UserService {
    state: AppState,
}

impl UserService {
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Verify credentials and issue a token. When captcha is enabled in
    /// the panel config, a previously validated captcha token must be
    /// presented.
    pub async fn login(&self, req: LoginRequest) -> Result<LoginResponse> {
        let captcha_enabled = self
            .state
            .configs()
            .value_or("captcha_enabled", "false")
            .await?
            == "true";
        if captcha_enabled {
            let token = req.captcha_id.as_deref().unwrap_or_default();
            if !self.state.captcha.validate(token) {
                return Err(Error::Unauthorized("验证码无效或已过期".to_string()));
            }
        }

        let user = self
            .state
            .users()
            .find_by_username(&req.username)
            .await?
            .ok_or_else(|| Error::bad_request("用户名或密码错误"))?;

        if user.pwd != password_digest(&req.password) {
            return Err(Error::bad_request("用户名或密码错误"));
        }
        if user.status != User::STATUS_ENABLED {
            return Err(Error::bad_request("账号已停用"));
        }

        let token = jwt::issue_token(&self.state.config.jwt, &user)?;
        let require_password_change =
            req.username == DEFAULT_CREDENTIAL && req.password == DEFAULT_CREDENTIAL;

        Ok(LoginResponse {
            token,
            role_id: user.role_id,
            name: user.user,
            require_password_change,
        })
    }

    pub async fn create(&self, req: CreateUserRequest) -> Result<i64> {
        if self.state.users().find_by_username(&req.user).await?.is_some() {
            return Err(Error::conflict("用户已存在"));
        }

        let record = NewUser {
            pwd: password_digest(&req.pwd),
            user: req.user,
            role_id: User::ROLE_REGULAR,
            exp_time: req.exp_time,
            flow: req.flow,
            num: req.num,
            flow_reset_time: req.flow_reset_time,
            status: req.status.unwrap_or(User::STATUS_ENABLED),
        };
        self.state.users().create(&record).await
    }

    pub async fn list(&self) -> Result<Vec<User>> {
        self.state.users().find_all().await
    }

    pub async fn update(&self, req: UpdateUserRequest) -> Result<()> {
        let mut user = self
            .state
            .users()
            .find_by_id(req.id)
            .await?
            .ok_or_else(|| Error::not_found("用户不存在"))?;

        if user.is_admin() {
            return Err(Error::conflict("不能修改管理员用户信息"));
        }

        if req.user != user.user {
            if let Some(existing) = self.state.users().find_by_username(&req.user).await? {
                if existing.id != user.id {
                    return Err(Error::conflict("用户名已被其他用户使用"));
                }
            }
            user.user = req.user;
        }

        user.exp_time = req.exp_time;
        user.flow = req.flow;
        user.num = req.num;
        user.flow_reset_time = req.flow_reset_time;
        if !req.pwd.is_empty() {
            user.pwd = password_digest(&req.pwd);
        }
        if let Some(status) = req.status {
            user.status = status;
        }

        self.state.users().update(&user).await
    }

    /// Soft-delete an account and take its forwards off the agents
    pub async fn delete(&self, id: i64) -> Result<()> {
        let user = self
            .state
            .users()
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::not_found("用户不存在"))?;

        if user.is_admin() {
            return Err(Error::conflict("不能删除管理员用户"));
        }

        crate::service::FlowService::new(self.state.clone())
            .pause_user_forwards(id)
            .await?;
        self.state.users().soft_delete(id).await
    }

    pub async fn toggle_status(&self, id: i64) -> Result<i32> {
        let user = self
            .state
            .users()
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::not_found("用户不存在"))?;

        if user.is_admin() {
            return Err(Error::conflict("不能停用管理员用户"));
        }

        let next = if user.status == User::STATUS_ENABLED {
            User::STATUS_DISABLED
        } else {
            User::STATUS_ENABLED
        };
        self.state.users().set_status(id, next).await?;
        Ok(next)
    }

    pub async fn package(&self, claims: &Claims) -> Result<UserPackage> {
        let user = self
            .state
            .users()
            .find_by_id(claims.sub)
            .await?
            .ok_or_else(|| Error::not_found("用户不存在"))?;

        let used_num = self.state.forwards().count_by_user(user.id).await?;

        Ok(UserPackage {
            user: user.user,
            exp_time: user.exp_time,
            flow: user.flow,
            used_flow: user.in_flow + user.out_flow,
            in_flow: user.in_flow,
            out_flow: user.out_flow,
            num: user.num,
            used_num,
            flow_reset_time: user.flow_reset_time,
        })
    }

    pub async fn update_password(&self, claims: &Claims, req: ChangePasswordRequest) -> Result<()> {
        if req.new_password != req.confirm_password {
            return Err(Error::bad_request("新密码和确认密码不匹配"));
        }

        let mut user = self
            .state
            .users()
            .find_by_id(claims.sub)
            .await?
            .ok_or_else(|| Error::not_found("用户不存在"))?;

        if user.pwd != password_digest(&req.current_password) {
            return Err(Error::bad_request("当前密码错误"));
        }

        if req.new_username != user.user {
            if let Some(existing) = self.state.users().find_by_username(&req.new_username).await? {
                if existing.id != user.id {
                    return Err(Error::conflict("用户名已被其他用户使用"));
                }
            }
            user.user = req.new_username;
        }

        user.pwd = password_digest(&req.new_password);
        self.state.users().update(&user).await
    }

    pub async fn reset_flow(&self, req: ResetFlowRequest) -> Result<()> {
        match req.reset_type {
            1 => self.state.users().reset_flow(req.id).await,
            2 => self.state.user_tunnels().reset_flow(req.id).await,
            _ => Err(Error::bad_request("未知的重置类型")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_digest_is_md5_hex() {
        // well-known md5 vector
        assert_eq!(password_digest("abc"), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(password_digest("").len(), 32);
    }
}
