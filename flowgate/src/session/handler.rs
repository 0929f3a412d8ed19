//! WebSocket admission and the per-session pump tasks
//!
//! A single endpoint serves both populations: a `secret` that verifies
//! as an operator bearer token joins the read-only push fanout; one
//! that matches a node row becomes that node's authenticated session,
//! replacing any predecessor.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::connection::{NodeSession, PING_INTERVAL, READ_TIMEOUT, WRITE_TIMEOUT};
use super::crypto::EncryptedEnvelope;
use super::messages::{AgentReply, InboundFrame, MessageType};
use crate::error::{Error, Result};
use crate::middleware::jwt;
use crate::models::Node;
use crate::state::AppState;

/// Outbound queue depth per session
const OUTBOUND_QUEUE: usize = 256;

/// Query parameters of the session endpoint
#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub secret: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub http: Option<i32>,
    #[serde(default)]
    pub tls: Option<i32>,
    #[serde(default)]
    pub socks: Option<i32>,
}

/// `GET /system-info?secret=...` — the shared upgrade endpoint
pub async fn session_endpoint(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    // operator tokens win the namespace: a JWT never collides with a
    // stored node secret
    if jwt::decode_token(&state.config.jwt, &query.secret).is_ok() {
        return Ok(ws.on_upgrade(move |socket| operator_session(state, socket)));
    }

    let node = state
        .nodes()
        .find_by_secret(&query.secret)
        .await?
        .ok_or_else(|| Error::Unauthorized("节点认证失败".to_string()))?;

    Ok(ws.on_upgrade(move |socket| node_session(state, node, query, socket)))
}

/// Push-only subscriber loop for a connected operator
async fn operator_session(state: AppState, socket: WebSocket) {
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
    let id = state.sessions.add_operator(tx);
    tracing::debug!(operator = id, "operator subscribed");

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            push = rx.recv() => {
                let Some(text) = push else { break };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                    _ => {}
                }
            }
        }
    }

    state.sessions.remove_operator(id);
    tracing::debug!(operator = id, "operator disconnected");
}

/// Authenticated node session: register, pump, tear down
async fn node_session(state: AppState, node: Node, query: SessionQuery, socket: WebSocket) {
    let cipher = if node.secret.is_empty() {
        None
    } else {
        match state.sessions.ciphers().get_or_create(&node.secret) {
            Ok(cipher) => Some(cipher),
            Err(e) => {
                tracing::error!(node_id = node.id, error = %e, "cipher derivation failed");
                return;
            }
        }
    };

    let (outbound_tx, outbound_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
    let session = Arc::new(NodeSession::new(node.id, cipher, outbound_tx));
    state.sessions.insert(session.clone());

    let version = query.version.clone().unwrap_or_else(|| node.version.clone());
    if let Err(e) = state
        .nodes()
        .set_online(
            node.id,
            &version,
            query.http.unwrap_or(node.http),
            query.tls.unwrap_or(node.tls),
            query.socks.unwrap_or(node.socks),
        )
        .await
    {
        tracing::warn!(node_id = node.id, error = %e, "failed to mark node online");
    }
    state.sessions.broadcast_status(node.id, true);
    tracing::info!(node_id = node.id, version = %version, "node connected");

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(writer_loop(sink, outbound_rx, session.clone()));

    reader_loop(&state, &session, stream).await;

    // replaced sessions must not mark their successor offline
    if state.sessions.remove_if_current(&session) {
        if let Err(e) = state.nodes().set_offline(node.id).await {
            tracing::warn!(node_id = node.id, error = %e, "failed to mark node offline");
        }
        state.sessions.broadcast_status(node.id, false);
        tracing::info!(node_id = node.id, "node disconnected");
    }
    session.close();
    let _ = writer.await;
}

/// Drain the outbound queue and keep the link alive with pings
async fn writer_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<String>,
    session: Arc<NodeSession>,
) {
    let cancel = session.cancel_token();
    let first_tick = tokio::time::Instant::now() + PING_INTERVAL;
    let mut ping = tokio::time::interval_at(first_tick, PING_INTERVAL);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            frame = outbound.recv() => {
                let Some(text) = frame else { break };
                match tokio::time::timeout(WRITE_TIMEOUT, sink.send(Message::Text(text.into()))).await {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
            _ = ping.tick() => {
                match tokio::time::timeout(WRITE_TIMEOUT, sink.send(Message::Ping(Vec::new().into()))).await {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
        }
    }

    let _ = sink.close().await;
}

/// Dispatch inbound frames until the socket dies or stays silent past
/// the read deadline
async fn reader_loop(state: &AppState, session: &Arc<NodeSession>, mut stream: SplitStream<WebSocket>) {
    let cancel = session.cancel_token();

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = tokio::time::timeout(READ_TIMEOUT, stream.next()) => next,
        };

        let message = match next {
            Err(_) => {
                tracing::warn!(node_id = session.node_id, "session read timeout");
                break;
            }
            Ok(None) | Ok(Some(Err(_))) => break,
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => handle_frame(state, session, text.as_str()).await,
            Message::Binary(data) => {
                if let Ok(text) = std::str::from_utf8(&data) {
                    handle_frame(state, session, text).await;
                }
            }
            Message::Close(_) => break,
            // pongs (and pings) reset the read deadline by arriving
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

/// Classify one inbound frame: correlated response, telemetry, or push
async fn handle_frame(state: &AppState, session: &Arc<NodeSession>, raw: &str) {
    let text = match unwrap_envelope(session, raw) {
        Some(text) => text,
        None => return,
    };

    let frame: InboundFrame = match serde_json::from_str(&text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(node_id = session.node_id, error = %e, "unparseable frame");
            return;
        }
    };

    // 1) correlated response to an outbound request
    if let Some(request_id) = &frame.request_id {
        if session.complete(request_id, AgentReply::from(&frame)) {
            return;
        }
    }

    // 2) periodic telemetry: fan out and ack so the agent keeps sending
    if is_telemetry(&frame) {
        state.sessions.broadcast(&json!({
            "id": session.node_id,
            "type": frame.kind.as_deref().unwrap_or("info"),
            "data": frame.data,
        }));
        if let Err(e) = session.push(json!("ok"), MessageType::Call) {
            tracing::debug!(node_id = session.node_id, error = %e, "telemetry ack not sent");
        }
        return;
    }

    // 3) anything else is forwarded verbatim as an info push
    let data = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
    state.sessions.broadcast(&json!({
        "type": "info",
        "id": session.node_id,
        "data": data,
    }));
}

fn unwrap_envelope(session: &NodeSession, raw: &str) -> Option<String> {
    let Ok(envelope) = serde_json::from_str::<EncryptedEnvelope>(raw) else {
        return Some(raw.to_string());
    };
    if !envelope.encrypted {
        return Some(raw.to_string());
    }

    let Some(cipher) = session.cipher() else {
        tracing::warn!(node_id = session.node_id, "encrypted frame on plaintext session");
        return None;
    };
    match cipher.decrypt(&envelope.data) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Some(text),
            Err(_) => {
                tracing::warn!(node_id = session.node_id, "decrypted frame is not UTF-8");
                None
            }
        },
        Err(e) => {
            tracing::warn!(node_id = session.node_id, error = %e, "frame decryption failed");
            None
        }
    }
}

fn is_telemetry(frame: &InboundFrame) -> bool {
    frame
        .data
        .as_ref()
        .is_some_and(|data| data.get("memory_usage").is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::crypto::CipherCache;

    #[test]
    fn test_telemetry_detection() {
        let telemetry: InboundFrame =
            serde_json::from_str(r#"{"type":"info","data":{"memory_usage":40.2,"cpu":1.5}}"#)
                .unwrap();
        assert!(is_telemetry(&telemetry));

        let push: InboundFrame = serde_json::from_str(r#"{"type":"log","data":{"line":"x"}}"#).unwrap();
        assert!(!is_telemetry(&push));
    }

    #[test]
    fn test_unwrap_envelope_plaintext() {
        let (tx, _rx) = mpsc::channel(1);
        let session = NodeSession::new(1, None, tx);
        let raw = r#"{"requestId":"a","success":true}"#;
        assert_eq!(unwrap_envelope(&session, raw).as_deref(), Some(raw));
    }

    #[test]
    fn test_unwrap_envelope_encrypted() {
        let cache = CipherCache::new();
        let cipher = cache.get_or_create("secret").unwrap();
        let sealed = cipher.seal_envelope(r#"{"requestId":"a","success":true}"#).unwrap();

        let (tx, _rx) = mpsc::channel(1);
        let session = NodeSession::new(1, Some(cipher), tx);
        assert_eq!(
            unwrap_envelope(&session, &sealed).as_deref(),
            Some(r#"{"requestId":"a","success":true}"#)
        );
    }

    #[test]
    fn test_encrypted_frame_without_cipher_dropped() {
        let cache = CipherCache::new();
        let cipher = cache.get_or_create("secret").unwrap();
        let sealed = cipher.seal_envelope("payload").unwrap();

        let (tx, _rx) = mpsc::channel(1);
        let session = NodeSession::new(1, None, tx);
        assert!(unwrap_envelope(&session, &sealed).is_none());
    }
}
