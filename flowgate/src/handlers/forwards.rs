//! `/api/v1/forward` handlers

use axum::extract::State;
use axum::Extension;

use super::response::{ApiResponse, ApiResult};
use super::users::IdRequest;
use super::ValidJson;
use crate::middleware::Claims;
use crate::models::Forward;
use crate::service::forwards::{
    CreateForwardRequest, DiagnosisResult, OrderItem, UpdateForwardRequest,
};
use crate::service::ForwardService;
use crate::state::AppState;

#[derive(Debug, serde::Deserialize)]
pub struct UpdateOrderRequest {
    pub forwards: Vec<OrderItem>,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ValidJson(req): ValidJson<CreateForwardRequest>,
) -> ApiResult<Forward> {
    let forward = ForwardService::new(state).create(&claims, req).await?;
    Ok(ApiResponse::ok(forward))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Vec<Forward>> {
    let forwards = ForwardService::new(state).list(&claims).await?;
    Ok(ApiResponse::ok(forwards))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ValidJson(req): ValidJson<UpdateForwardRequest>,
) -> ApiResult<()> {
    ForwardService::new(state).update(&claims, req).await?;
    Ok(ApiResponse::success())
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ValidJson(req): ValidJson<IdRequest>,
) -> ApiResult<()> {
    ForwardService::new(state).delete(&claims, req.id).await?;
    Ok(ApiResponse::success())
}

pub async fn force_delete(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<IdRequest>,
) -> ApiResult<()> {
    ForwardService::new(state).force_delete(req.id).await?;
    Ok(ApiResponse::success())
}

pub async fn pause(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ValidJson(req): ValidJson<IdRequest>,
) -> ApiResult<()> {
    ForwardService::new(state).pause(&claims, req.id).await?;
    Ok(ApiResponse::success())
}

pub async fn resume(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ValidJson(req): ValidJson<IdRequest>,
) -> ApiResult<()> {
    ForwardService::new(state).resume(&claims, req.id).await?;
    Ok(ApiResponse::success())
}

pub async fn diagnose(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ValidJson(req): ValidJson<IdRequest>,
) -> ApiResult<Vec<DiagnosisResult>> {
    let results = ForwardService::new(state).diagnose(&claims, req.id).await?;
    Ok(ApiResponse::ok(results))
}

pub async fn update_order(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<UpdateOrderRequest>,
) -> ApiResult<()> {
    ForwardService::new(state).update_order(req.forwards).await?;
    Ok(ApiResponse::success())
}
