//! `/api/v1/user` handlers

use axum::extract::State;
use axum::Extension;

use super::response::{ApiResponse, ApiResult};
use super::ValidJson;
use crate::middleware::Claims;
use crate::models::User;
use crate::service::users::{
    ChangePasswordRequest, CreateUserRequest, LoginRequest, LoginResponse, ResetFlowRequest,
    UpdateUserRequest, UserPackage,
};
use crate::service::UserService;
use crate::state::AppState;

#[derive(Debug, serde::Deserialize)]
pub struct IdRequest {
    pub id: i64,
}

pub async fn login(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<LoginRequest>,
) -> ApiResult<LoginResponse> {
    let response = UserService::new(state).login(req).await?;
    Ok(ApiResponse::ok(response))
}

pub async fn package(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<UserPackage> {
    let package = UserService::new(state).package(&claims).await?;
    Ok(ApiResponse::ok(package))
}

pub async fn update_password(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ValidJson(req): ValidJson<ChangePasswordRequest>,
) -> ApiResult<()> {
    UserService::new(state).update_password(&claims, req).await?;
    Ok(ApiResponse::success())
}

pub async fn create(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<CreateUserRequest>,
) -> ApiResult<i64> {
    let id = UserService::new(state).create(req).await?;
    Ok(ApiResponse::ok(id))
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Vec<User>> {
    let users = UserService::new(state).list().await?;
    Ok(ApiResponse::ok(users))
}

pub async fn update(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<UpdateUserRequest>,
) -> ApiResult<()> {
    UserService::new(state).update(req).await?;
    Ok(ApiResponse::success())
}

pub async fn delete(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<IdRequest>,
) -> ApiResult<()> {
    UserService::new(state).delete(req.id).await?;
    Ok(ApiResponse::success())
}

pub async fn reset(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<ResetFlowRequest>,
) -> ApiResult<()> {
    UserService::new(state).reset_flow(req).await?;
    Ok(ApiResponse::success())
}

pub async fn toggle_status(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<IdRequest>,
) -> ApiResult<i32> {
    let status = UserService::new(state).toggle_status(req.id).await?;
    Ok(ApiResponse::ok(status))
}
