//! `/api/v1/speed-limit` handlers

use axum::extract::State;

use super::response::{ApiResponse, ApiResult};
use super::users::IdRequest;
use super::ValidJson;
use crate::models::{SpeedLimit, Tunnel};
use crate::service::speed_limits::{CreateSpeedLimitRequest, UpdateSpeedLimitRequest};
use crate::service::SpeedLimitService;
use crate::state::AppState;

pub async fn create(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<CreateSpeedLimitRequest>,
) -> ApiResult<i64> {
    let id = SpeedLimitService::new(state).create(req).await?;
    Ok(ApiResponse::ok(id))
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Vec<SpeedLimit>> {
    let limits = SpeedLimitService::new(state).list().await?;
    Ok(ApiResponse::ok(limits))
}

pub async fn update(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<UpdateSpeedLimitRequest>,
) -> ApiResult<()> {
    SpeedLimitService::new(state).update(req).await?;
    Ok(ApiResponse::success())
}

pub async fn delete(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<IdRequest>,
) -> ApiResult<()> {
    SpeedLimitService::new(state).delete(req.id).await?;
    Ok(ApiResponse::success())
}

pub async fn tunnels(State(state): State<AppState>) -> ApiResult<Vec<Tunnel>> {
    let tunnels = SpeedLimitService::new(state).tunnels().await?;
    Ok(ApiResponse::ok(tunnels))
}
