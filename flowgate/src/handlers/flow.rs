//! Agent data plane (`/flow/*`)
//!
//! Node-secret auth only, and every path answers `200 "ok"` no matter
//! what happened: the endpoint must never divulge whether a secret
//! exists or a payload parsed.

use axum::body::Bytes;
use axum::extract::{Query, State};
use serde::Deserialize;

use crate::service::flow::{AgentSnapshot, FlowReport};
use crate::service::FlowService;
use crate::session::open_payload;
use crate::state::AppState;

const OK: &str = "ok";

#[derive(Debug, Deserialize)]
pub struct SecretQuery {
    #[serde(default)]
    pub secret: String,
}

/// `POST /flow/upload?secret=...` — traffic-accounting report, raw JSON
/// or the encrypted envelope
pub async fn upload(
    State(state): State<AppState>,
    Query(query): Query<SecretQuery>,
    body: Bytes,
) -> &'static str {
    let Ok(Some(node)) = state.nodes().find_by_secret(&query.secret).await else {
        return OK;
    };

    let Ok(payload) = open_payload(&body, state.sessions.ciphers(), &node.secret) else {
        tracing::warn!(node_id = node.id, "undecryptable flow upload");
        return OK;
    };

    let Ok(report) = serde_json::from_slice::<FlowReport>(&payload) else {
        tracing::warn!(node_id = node.id, "unparseable flow upload");
        return OK;
    };

    FlowService::new(state).ingest(report).await;
    OK
}

/// `POST /flow/config?secret=...` — agent config snapshot; drives the
/// orphan GC off the request thread
pub async fn config(
    State(state): State<AppState>,
    Query(query): Query<SecretQuery>,
    body: Bytes,
) -> &'static str {
    let Ok(Some(node)) = state.nodes().find_by_secret(&query.secret).await else {
        return OK;
    };

    let Ok(payload) = open_payload(&body, state.sessions.ciphers(), &node.secret) else {
        return OK;
    };

    let Ok(snapshot) = serde_json::from_slice::<AgentSnapshot>(&payload) else {
        tracing::warn!(node_id = node.id, "unparseable config snapshot");
        return OK;
    };

    let node_id = node.id;
    tokio::spawn(async move {
        if let Err(e) = FlowService::new(state).gc_agent_config(node_id, snapshot).await {
            tracing::warn!(node_id, error = %e, "orphan GC failed");
        }
    });

    OK
}

/// `ANY /flow/test`
pub async fn test() -> &'static str {
    OK
}
