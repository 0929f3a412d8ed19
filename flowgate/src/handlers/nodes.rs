//! `/api/v1/node` handlers

use axum::extract::State;

use super::response::{ApiResponse, ApiResult};
use super::users::IdRequest;
use super::ValidJson;
use crate::models::Node;
use crate::service::nodes::{CreateNodeRequest, NodeStatus, UpdateNodeRequest};
use crate::service::NodeService;
use crate::state::AppState;

#[derive(Debug, serde::Deserialize)]
pub struct CheckStatusRequest {
    #[serde(default)]
    pub id: Option<i64>,
}

pub async fn create(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<CreateNodeRequest>,
) -> ApiResult<i64> {
    let id = NodeService::new(state).create(req).await?;
    Ok(ApiResponse::ok(id))
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Vec<Node>> {
    let nodes = NodeService::new(state).list().await?;
    Ok(ApiResponse::ok(nodes))
}

pub async fn update(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<UpdateNodeRequest>,
) -> ApiResult<()> {
    NodeService::new(state).update(req).await?;
    Ok(ApiResponse::success())
}

pub async fn delete(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<IdRequest>,
) -> ApiResult<()> {
    NodeService::new(state).delete(req.id).await?;
    Ok(ApiResponse::success())
}

pub async fn install(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<IdRequest>,
) -> ApiResult<String> {
    let command = NodeService::new(state).install_command(req.id).await?;
    Ok(ApiResponse::ok(command))
}

pub async fn check_status(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<CheckStatusRequest>,
) -> ApiResult<Vec<NodeStatus>> {
    let statuses = NodeService::new(state).check_status(req.id).await?;
    Ok(ApiResponse::ok(statuses))
}
