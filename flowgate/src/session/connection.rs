//! A single live node session

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::crypto::SecretCipher;
use super::messages::{AgentReply, MessageType, OutboundFrame};
use crate::error::SessionError;

/// Deadline for enqueueing an outbound frame
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for a correlated agent reply
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);
/// Ping cadence on the writer
pub const PING_INTERVAL: Duration = Duration::from_secs(30);
/// Reader gives up when the socket stays silent this long
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);
/// Deadline for a single socket write
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// One authenticated agent session.
///
/// Holds the outbound queue drained by the writer task, the map of
/// pending correlation slots resolved by the reader task, the cipher
/// derived from the node's secret, and the termination signal that
/// wakes both tasks.
pub struct NodeSession {
    pub node_id: i64,
    cipher: Option<Arc<SecretCipher>>,
    outbound: mpsc::Sender<String>,
    pending: DashMap<String, oneshot::Sender<AgentReply>>,
    cancel: CancellationToken,
}

impl NodeSession {
    /// Create a session around an outbound queue. The caller owns the
    /// receiving half and the socket tasks.
    #[must_use]
    pub fn new(node_id: i64, cipher: Option<Arc<SecretCipher>>, outbound: mpsc::Sender<String>) -> Self {
        Self {
            node_id,
            cipher,
            outbound,
            pending: DashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// The session's termination signal
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether frames on this session are encrypted
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Session cipher, when the node has a secret
    #[must_use]
    pub fn cipher(&self) -> Option<&Arc<SecretCipher>> {
        self.cipher.as_ref()
    }

    /// Send a request frame and await the correlated reply.
    ///
    /// Concurrent callers are independent: each request carries a fresh
    /// correlation id and its own one-shot slot.
    pub async fn request(&self, data: Value, kind: MessageType) -> Result<AgentReply, SessionError> {
        let request_id = Uuid::new_v4().simple().to_string();
        let frame = OutboundFrame::request(kind, data, request_id.clone());
        let text = self.encode(&frame)?;

        let (tx, mut rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        let enqueue = tokio::select! {
            res = self.outbound.send_timeout(text, SEND_TIMEOUT) => res,
            () = self.cancel.cancelled() => {
                self.pending.remove(&request_id);
                return Err(SessionError::ConnectionClosed);
            }
        };

        if let Err(e) = enqueue {
            self.pending.remove(&request_id);
            return Err(match e {
                mpsc::error::SendTimeoutError::Timeout(_) => SessionError::SendTimeout,
                mpsc::error::SendTimeoutError::Closed(_) => SessionError::ConnectionClosed,
            });
        }

        tokio::select! {
            reply = &mut rx => reply.map_err(|_| SessionError::ConnectionClosed),
            () = self.cancel.cancelled() => {
                self.pending.remove(&request_id);
                Err(SessionError::ConnectionClosed)
            }
            () = tokio::time::sleep(RESPONSE_TIMEOUT) => {
                self.pending.remove(&request_id);
                Err(SessionError::ResponseTimeout)
            }
        }
    }

    /// Enqueue a one-way frame (no correlation slot); used for the
    /// telemetry acknowledgement.
    pub fn push(&self, data: Value, kind: MessageType) -> Result<(), SessionError> {
        let frame = OutboundFrame::push(kind, data);
        let text = self.encode(&frame)?;
        self.outbound
            .try_send(text)
            .map_err(|_| SessionError::SendTimeout)
    }

    /// Resolve a correlated reply. Returns false when the id matches no
    /// pending request (late or unknown replies are discarded).
    pub fn complete(&self, request_id: &str, reply: AgentReply) -> bool {
        match self.pending.remove(request_id) {
            Some((_, slot)) => slot.send(reply).is_ok(),
            None => false,
        }
    }

    /// Signal termination: wakes the session tasks and fails every
    /// pending correlation slot with `CONNECTION_CLOSED`.
    pub fn close(&self) {
        self.cancel.cancel();
        self.pending.retain(|_, _| false);
    }

    fn encode(&self, frame: &OutboundFrame) -> Result<String, SessionError> {
        let text = serde_json::to_string(frame).map_err(|e| SessionError::Codec(e.to_string()))?;
        match &self.cipher {
            Some(cipher) => cipher.seal_envelope(&text),
            None => Ok(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plain_session(capacity: usize) -> (Arc<NodeSession>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(NodeSession::new(7, None, tx)), rx)
    }

    fn request_id_of(frame_text: &str) -> String {
        let value: Value = serde_json::from_str(frame_text).unwrap();
        value["requestId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_request_reply_correlation() {
        let (session, mut rx) = plain_session(8);

        let responder = session.clone();
        let echo = tokio::spawn(async move {
            let frame = rx.recv().await.unwrap();
            let id = request_id_of(&frame);
            responder.complete(
                &id,
                AgentReply {
                    success: true,
                    message: "ok".to_string(),
                    data: None,
                },
            );
        });

        let reply = session.request(json!({"x": 1}), MessageType::AddService).await.unwrap();
        assert!(reply.success);
        assert_eq!(reply.message, "ok");
        echo.await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_requests_route_to_their_callers() {
        let (session, mut rx) = plain_session(8);

        let responder = session.clone();
        let echo = tokio::spawn(async move {
            // answer in reverse arrival order to prove correlation
            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            for frame in [second, first] {
                let id = request_id_of(&frame);
                let value: Value = serde_json::from_str(&frame).unwrap();
                responder.complete(
                    &id,
                    AgentReply {
                        success: true,
                        message: value["data"]["tag"].as_str().unwrap().to_string(),
                        data: None,
                    },
                );
            }
        });

        let (a, b) = tokio::join!(
            session.request(json!({"tag": "a"}), MessageType::PauseService),
            session.request(json!({"tag": "b"}), MessageType::ResumeService),
        );
        assert_eq!(a.unwrap().message, "a");
        assert_eq!(b.unwrap().message, "b");
        echo.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_reply_discarded() {
        let (session, _rx) = plain_session(8);
        let delivered = session.complete(
            "no-such-id",
            AgentReply {
                success: true,
                message: String::new(),
                data: None,
            },
        );
        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_close_fails_pending_with_connection_closed() {
        let (session, mut rx) = plain_session(8);

        let requester = session.clone();
        let pending = tokio::spawn(async move {
            requester.request(json!({}), MessageType::DeleteService).await
        });

        let _frame = rx.recv().await.unwrap();
        session.close();

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err, SessionError::ConnectionClosed);
    }

    #[tokio::test]
    async fn test_send_timeout_when_queue_full() {
        // capacity-1 queue that nobody drains
        let (session, _rx) = plain_session(1);
        session.push(json!("fill"), MessageType::Call).unwrap();

        tokio::time::pause();
        let fut = session.request(json!({}), MessageType::AddChains);
        tokio::pin!(fut);
        tokio::time::advance(SEND_TIMEOUT + Duration::from_millis(10)).await;
        let err = fut.await.unwrap_err();
        assert_eq!(err, SessionError::SendTimeout);
    }
}
