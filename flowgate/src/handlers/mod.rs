//! Operator API surface and agent data plane
//!
//! Route families under `/api/v1` wrap the domain services; the
//! `/flow/*` endpoints serve agents (node-secret auth only) and the
//! single WebSocket endpoint serves both agent sessions and operator
//! push subscribers.

pub mod captcha;
pub mod configs;
pub mod flow;
pub mod forwards;
pub mod nodes;
pub mod open_api;
pub mod response;
pub mod speed_limits;
pub mod tunnels;
pub mod users;

use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::Response;
use axum::routing::{any, get, post};
use axum::{Json, Router};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::Error;
use crate::middleware::{require_admin, require_auth};
use crate::session;
use crate::state::AppState;

use self::response::ApiResponse;

/// JSON extractor whose rejection renders the uniform validation error
/// instead of axum's plain-text 400
pub struct ValidJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: serde::de::DeserializeOwned,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|_| Error::Validation)?;
        Ok(Self(value))
    }
}

/// Assemble the full application router
pub fn build_router(state: AppState) -> Router {
    let user_routes = Router::new()
        .route("/package", post(users::package))
        .route("/updatePassword", post(users::update_password))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let user_admin_routes = Router::new()
        .route("/create", post(users::create))
        .route("/list", post(users::list))
        .route("/update", post(users::update))
        .route("/delete", post(users::delete))
        .route("/reset", post(users::reset))
        .route("/toggle-status", post(users::toggle_status))
        .route_layer(from_fn(require_admin))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let node_routes = Router::new()
        .route("/create", post(nodes::create))
        .route("/list", post(nodes::list))
        .route("/update", post(nodes::update))
        .route("/delete", post(nodes::delete))
        .route("/install", post(nodes::install))
        .route("/check-status", post(nodes::check_status))
        .route_layer(from_fn(require_admin))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let tunnel_user_route = Router::new()
        .route("/user/tunnel", post(tunnels::my_grants))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let tunnel_admin_routes = Router::new()
        .route("/create", post(tunnels::create))
        .route("/list", post(tunnels::list))
        .route("/get", post(tunnels::get))
        .route("/update", post(tunnels::update))
        .route("/delete", post(tunnels::delete))
        .route("/diagnose", post(tunnels::diagnose))
        .route("/user/assign", post(tunnels::assign_grant))
        .route("/user/list", post(tunnels::list_grants))
        .route("/user/remove", post(tunnels::remove_grant))
        .route("/user/update", post(tunnels::update_grant))
        .route_layer(from_fn(require_admin))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let forward_routes = Router::new()
        .route("/create", post(forwards::create))
        .route("/list", post(forwards::list))
        .route("/update", post(forwards::update))
        .route("/delete", post(forwards::delete))
        .route("/pause", post(forwards::pause))
        .route("/resume", post(forwards::resume))
        .route("/diagnose", post(forwards::diagnose))
        .route("/update-order", post(forwards::update_order))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let forward_admin_routes = Router::new()
        .route("/force-delete", post(forwards::force_delete))
        .route_layer(from_fn(require_admin))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let speed_limit_routes = Router::new()
        .route("/create", post(speed_limits::create))
        .route("/list", post(speed_limits::list))
        .route("/update", post(speed_limits::update))
        .route("/delete", post(speed_limits::delete))
        .route("/tunnels", post(speed_limits::tunnels))
        .route_layer(from_fn(require_admin))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let config_routes = Router::new()
        .route("/list", post(configs::list))
        .route("/get", post(configs::get))
        .route("/update", post(configs::update))
        .route("/update-single", post(configs::update_single))
        .route_layer(from_fn(require_admin))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let captcha_routes = Router::new()
        .route("/check", post(captcha::check))
        .route("/generate", post(captcha::generate))
        .route("/verify", post(captcha::verify))
        .route("/verify-turnstile", post(captcha::verify_turnstile));

    let api = Router::new()
        .nest(
            "/user",
            Router::new()
                .route("/login", post(users::login))
                .merge(user_routes)
                .merge(user_admin_routes),
        )
        .nest("/node", node_routes)
        .nest("/tunnel", tunnel_user_route.merge(tunnel_admin_routes))
        .nest("/forward", forward_routes.merge(forward_admin_routes))
        .nest("/speed-limit", speed_limit_routes)
        .nest("/config", config_routes)
        .nest("/captcha", captcha_routes);

    let max_connections = state.config.server.max_connections as usize;

    Router::new()
        .nest("/api/v1", api)
        .route("/flow/upload", post(flow::upload))
        .route("/flow/config", post(flow::config))
        .route("/flow/test", any(flow::test))
        .route("/open_api/sub_store", get(open_api::sub_store))
        .route("/system-info", get(session::session_endpoint))
        .route("/health", get(health))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(tower::limit::GlobalConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

async fn health() -> ApiResponse<&'static str> {
    ApiResponse::ok("ok")
}

/// Recovered handler panics render the uniform internal-error envelope
fn handle_panic(_err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    tracing::error!("handler panicked");
    let body = serde_json::to_string(&ApiResponse::<()>::error_with_code(500, "服务器内部错误"))
        .unwrap_or_else(|_| r#"{"code":500,"msg":"服务器内部错误"}"#.to_string());

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body))
        .unwrap_or_default()
}
