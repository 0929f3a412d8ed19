//! Live session registry and operator fanout

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::connection::NodeSession;
use super::crypto::CipherCache;
use super::messages::{AgentReply, MessageType};
use crate::error::SessionError;

/// Maps `node_id -> NodeSession` and fans pushes out to connected
/// operator subscribers. The registry is shared process-wide behind an
/// `Arc`.
pub struct SessionRegistry {
    nodes: DashMap<i64, Arc<NodeSession>>,
    operators: DashMap<u64, mpsc::Sender<String>>,
    operator_seq: AtomicU64,
    ciphers: CipherCache,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            operators: DashMap::new(),
            operator_seq: AtomicU64::new(0),
            ciphers: CipherCache::new(),
        }
    }

    /// Shared cipher cache (also used by the flow upload endpoint)
    #[must_use]
    pub fn ciphers(&self) -> &CipherCache {
        &self.ciphers
    }

    /// Install a session for a node, gracefully closing any previous one.
    pub fn insert(&self, session: Arc<NodeSession>) {
        let node_id = session.node_id;
        if let Some(old) = self.nodes.insert(node_id, session) {
            tracing::info!(node_id, "replacing existing node session");
            old.close();
        }
    }

    /// Remove the session, but only if it is still the current one for
    /// its node: a replaced session must not tear down its successor's
    /// registration. Returns true when this call removed the entry.
    pub fn remove_if_current(&self, session: &Arc<NodeSession>) -> bool {
        let removed = self
            .nodes
            .remove_if(&session.node_id, |_, current| Arc::ptr_eq(current, session))
            .is_some();
        if removed {
            session.close();
        }
        removed
    }

    #[must_use]
    pub fn get(&self, node_id: i64) -> Option<Arc<NodeSession>> {
        self.nodes.get(&node_id).map(|s| s.clone())
    }

    #[must_use]
    pub fn is_connected(&self, node_id: i64) -> bool {
        self.nodes.contains_key(&node_id)
    }

    /// Send a request to a node and await the correlated reply
    pub async fn request(&self, node_id: i64, data: Value, kind: MessageType) -> Result<AgentReply, SessionError> {
        let session = self.get(node_id).ok_or(SessionError::NodeNotConnected)?;
        session.request(data, kind).await
    }

    /// Register an operator subscriber; the returned id releases it
    pub fn add_operator(&self, sender: mpsc::Sender<String>) -> u64 {
        let id = self.operator_seq.fetch_add(1, Ordering::Relaxed);
        self.operators.insert(id, sender);
        id
    }

    pub fn remove_operator(&self, id: u64) {
        self.operators.remove(&id);
    }

    /// Push a JSON value to every operator subscriber. Slow or closed
    /// subscribers are dropped rather than blocking the caller.
    pub fn broadcast(&self, value: &Value) {
        let text = value.to_string();
        let mut dead = Vec::new();
        for entry in self.operators.iter() {
            if entry.value().try_send(text.clone()).is_err() {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.operators.remove(&id);
        }
    }

    /// Push a node status transition (`data`: 1 online, 0 offline)
    pub fn broadcast_status(&self, node_id: i64, online: bool) {
        self.broadcast(&json!({
            "type": "status",
            "id": node_id,
            "data": i32::from(online),
        }));
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn operator_count(&self) -> usize {
        self.operators.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(node_id: i64) -> (Arc<NodeSession>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(8);
        (Arc::new(NodeSession::new(node_id, None, tx)), rx)
    }

    #[tokio::test]
    async fn test_replacement_closes_old_session() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = session(1);
        let (b, _rx_b) = session(1);

        registry.insert(a.clone());
        registry.insert(b.clone());

        assert!(a.cancel_token().is_cancelled());
        assert!(!b.cancel_token().is_cancelled());
        assert!(Arc::ptr_eq(&registry.get(1).unwrap(), &b));
    }

    #[tokio::test]
    async fn test_stale_session_does_not_remove_successor() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = session(1);
        let (b, _rx_b) = session(1);

        registry.insert(a.clone());
        registry.insert(b.clone());

        // the replaced session's teardown path runs late
        assert!(!registry.remove_if_current(&a));
        assert!(registry.is_connected(1));

        assert!(registry.remove_if_current(&b));
        assert!(!registry.is_connected(1));
    }

    #[tokio::test]
    async fn test_request_without_session() {
        let registry = SessionRegistry::new();
        let err = registry
            .request(42, serde_json::json!({}), MessageType::AddService)
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::NodeNotConnected);
    }

    #[tokio::test]
    async fn test_broadcast_drops_dead_subscribers() {
        let registry = SessionRegistry::new();
        let (tx_live, mut rx_live) = mpsc::channel(8);
        let (tx_dead, rx_dead) = mpsc::channel(8);
        drop(rx_dead);

        registry.add_operator(tx_live);
        registry.add_operator(tx_dead);
        assert_eq!(registry.operator_count(), 2);

        registry.broadcast_status(3, true);
        assert_eq!(registry.operator_count(), 1);

        let text = rx_live.recv().await.unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "status");
        assert_eq!(value["id"], 3);
        assert_eq!(value["data"], 1);
    }
}
