//! `/api/v1/tunnel` handlers

use axum::extract::State;
use axum::Extension;

use super::response::{ApiResponse, ApiResult};
use super::users::IdRequest;
use super::ValidJson;
use crate::middleware::Claims;
use crate::models::{Tunnel, UserTunnel};
use crate::service::forwards::DiagnosisResult;
use crate::service::tunnels::{
    AssignGrantRequest, CreateTunnelRequest, UpdateGrantRequest, UpdateTunnelRequest,
};
use crate::service::TunnelService;
use crate::state::AppState;

#[derive(Debug, serde::Deserialize)]
pub struct GrantQueryRequest {
    #[serde(rename = "tunnelId", default)]
    pub tunnel_id: Option<i64>,
    #[serde(rename = "userId", default)]
    pub user_id: Option<i64>,
}

pub async fn create(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<CreateTunnelRequest>,
) -> ApiResult<i64> {
    let id = TunnelService::new(state).create(req).await?;
    Ok(ApiResponse::ok(id))
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Vec<Tunnel>> {
    let tunnels = TunnelService::new(state).list().await?;
    Ok(ApiResponse::ok(tunnels))
}

pub async fn get(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<IdRequest>,
) -> ApiResult<Tunnel> {
    let tunnel = TunnelService::new(state).get(req.id).await?;
    Ok(ApiResponse::ok(tunnel))
}

pub async fn update(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<UpdateTunnelRequest>,
) -> ApiResult<()> {
    TunnelService::new(state).update(req).await?;
    Ok(ApiResponse::success())
}

pub async fn delete(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<IdRequest>,
) -> ApiResult<()> {
    TunnelService::new(state).delete(req.id).await?;
    Ok(ApiResponse::success())
}

pub async fn diagnose(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<IdRequest>,
) -> ApiResult<Vec<DiagnosisResult>> {
    let results = TunnelService::new(state).diagnose(req.id).await?;
    Ok(ApiResponse::ok(results))
}

pub async fn assign_grant(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<AssignGrantRequest>,
) -> ApiResult<i64> {
    let id = TunnelService::new(state).assign_grant(req).await?;
    Ok(ApiResponse::ok(id))
}

pub async fn list_grants(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<GrantQueryRequest>,
) -> ApiResult<Vec<UserTunnel>> {
    let grants = TunnelService::new(state)
        .list_grants(req.tunnel_id, req.user_id)
        .await?;
    Ok(ApiResponse::ok(grants))
}

pub async fn remove_grant(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<IdRequest>,
) -> ApiResult<()> {
    TunnelService::new(state).remove_grant(req.id).await?;
    Ok(ApiResponse::success())
}

pub async fn update_grant(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<UpdateGrantRequest>,
) -> ApiResult<()> {
    TunnelService::new(state).update_grant(req).await?;
    Ok(ApiResponse::success())
}

/// Grants of the calling user
pub async fn my_grants(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Vec<UserTunnel>> {
    let grants = TunnelService::new(state)
        .list_grants(None, Some(claims.sub))
        .await?;
    Ok(ApiResponse::ok(grants))
}
