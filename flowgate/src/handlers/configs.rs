//! `/api/v1/config` handlers

use axum::extract::State;

use super::response::{ApiResponse, ApiResult};
use super::ValidJson;
use crate::models::PanelConfig;
use crate::service::configs::UpdateConfigsRequest;
use crate::service::ConfigService;
use crate::state::AppState;

#[derive(Debug, serde::Deserialize)]
pub struct NameRequest {
    pub name: String,
}

#[derive(Debug, serde::Deserialize)]
pub struct SingleUpdateRequest {
    pub name: String,
    pub value: String,
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Vec<PanelConfig>> {
    let configs = ConfigService::new(state).list().await?;
    Ok(ApiResponse::ok(configs))
}

pub async fn get(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<NameRequest>,
) -> ApiResult<PanelConfig> {
    let config = ConfigService::new(state).get(&req.name).await?;
    Ok(ApiResponse::ok(config))
}

pub async fn update(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<UpdateConfigsRequest>,
) -> ApiResult<()> {
    ConfigService::new(state).update(req).await?;
    Ok(ApiResponse::success())
}

pub async fn update_single(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<SingleUpdateRequest>,
) -> ApiResult<()> {
    ConfigService::new(state).update_single(&req.name, &req.value).await?;
    Ok(ApiResponse::success())
}
