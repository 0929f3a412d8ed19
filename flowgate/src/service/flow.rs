//! Flow accounting and quota enforcement pipeline
//!
//! Agents report per-service byte counters; this module attributes them
//! to the forward, the owning user and the user-tunnel grant, applies
//! the tunnel's traffic multiplier, and pauses rules whose quota or
//! expiry is breached. Counter updates for the same key are serialized
//! by fine-grained in-process locks held only across the single SQL
//! update, so concurrent reports never lose increments while unrelated
//! keys stay uncoupled.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::Deserialize;

use crate::error::Result;
use crate::models::{Forward, User, UserTunnel, BYTES_PER_GB};
use crate::service::forwards::ForwardService;
use crate::state::AppState;

/// Grant id used by admin-owned forwards without a grant
const NO_GRANT: i64 = 0;

/// Agent flow report: `n` is the canonical service name
/// `<forwardId>_<userId>_<grantId>`, `u`/`d` the uploaded and
/// downloaded byte counts since the previous report.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowReport {
    pub n: String,
    #[serde(default)]
    pub u: i64,
    #[serde(default)]
    pub d: i64,
}

/// Agent config snapshot posted to `/flow/config`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentSnapshot {
    #[serde(default)]
    pub limiters: Vec<NamedItem>,
    #[serde(default)]
    pub chains: Vec<NamedItem>,
    #[serde(default)]
    pub services: Vec<NamedItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedItem {
    pub name: String,
}

/// Lazily-created per-key mutexes behind one coarse registry lock.
///
/// Entries are created on first use and retained for the process
/// lifetime, bounded by the number of distinct ids.
#[derive(Default)]
pub struct KeyedLocks {
    inner: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut guard = self.inner.lock().expect("lock registry poisoned");
        guard
            .entry(id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// Registry of the three per-key lock maps the accounting path uses
#[derive(Default)]
pub struct FlowLockRegistry {
    forwards: KeyedLocks,
    users: KeyedLocks,
    grants: KeyedLocks,
}

impl FlowLockRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(&self, id: i64) -> Arc<tokio::sync::Mutex<()>> {
        self.forwards.get(id)
    }

    pub fn user(&self, id: i64) -> Arc<tokio::sync::Mutex<()>> {
        self.users.get(id)
    }

    pub fn grant(&self, id: i64) -> Arc<tokio::sync::Mutex<()>> {
        self.grants.get(id)
    }
}

/// Attributed deltas after applying the tunnel multiplier
#[must_use]
pub fn attribute(uploaded: i64, downloaded: i64, traffic_ratio: f64, flow_type: i32) -> (i64, i64) {
    let multiplier = traffic_ratio * f64::from(flow_type);
    let delta_in = (downloaded as f64 * multiplier).floor() as i64;
    let delta_out = (uploaded as f64 * multiplier).floor() as i64;
    (delta_in, delta_out)
}

/// Whether a quota (in gigabytes) is exhausted by the used byte counters
#[must_use]
pub fn quota_exceeded(used_in: i64, used_out: i64, quota_gb: i64) -> bool {
    used_in + used_out >= quota_gb * BYTES_PER_GB
}

/// Whether an expiry timestamp (ms) has passed; 0 means no expiry
#[must_use]
pub fn expired(exp_time: i64, now_millis: i64) -> bool {
    exp_time > 0 && exp_time <= now_millis
}

/// The ingestion path for agent-reported byte counters
#[derive(Clone)]
pub struct FlowService {
    state: AppState,
}

impl FlowService {
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Process one report. Failures are logged, never surfaced: the
    /// data-plane endpoint answers `ok` regardless.
    pub async fn ingest(&self, report: FlowReport) {
        if report.n == "web_api" {
            return;
        }
        if let Err(e) = self.process(&report).await {
            tracing::warn!(service = %report.n, error = %e, "flow report dropped");
        }
    }

    async fn process(&self, report: &FlowReport) -> Result<()> {
        let Some((forward_id, user_id, grant_id)) = crate::gost::parse_service_name(&report.n)
        else {
            return Ok(());
        };

        let Some(forward) = self.state.forwards().find_by_id(forward_id).await? else {
            return Ok(());
        };

        // tunnel gone: fall back to neutral multipliers rather than
        // dropping the bytes
        let (ratio, flow_type) = match self.state.tunnels().find_by_id(forward.tunnel_id).await? {
            Some(tunnel) => (tunnel.traffic_ratio, tunnel.flow),
            None => (1.0, 2),
        };

        let (delta_in, delta_out) = attribute(report.u, report.d, ratio, flow_type);

        {
            let lock = self.state.flow_locks.forward(forward_id);
            let _guard = lock.lock().await;
            self.state.forwards().add_flow(forward_id, delta_in, delta_out).await?;
        }

        {
            let lock = self.state.flow_locks.user(user_id);
            let _guard = lock.lock().await;
            self.state.users().add_flow(user_id, delta_in, delta_out).await?;
        }

        if grant_id != NO_GRANT {
            let lock = self.state.flow_locks.grant(grant_id);
            let _guard = lock.lock().await;
            self.state.user_tunnels().add_flow(grant_id, delta_in, delta_out).await?;
        }

        if grant_id != NO_GRANT {
            self.check_user_limits(user_id).await?;
            self.check_grant_limits(grant_id, user_id).await?;
        }

        Ok(())
    }

    async fn check_user_limits(&self, user_id: i64) -> Result<()> {
        let Some(user) = self.state.users().find_by_id(user_id).await? else {
            return Ok(());
        };

        let now = chrono::Utc::now().timestamp_millis();
        let breached = quota_exceeded(user.in_flow, user.out_flow, user.flow)
            || expired(user.exp_time, now)
            || user.status != User::STATUS_ENABLED;

        if breached {
            self.pause_user_forwards(user_id).await?;
        }
        Ok(())
    }

    async fn check_grant_limits(&self, grant_id: i64, user_id: i64) -> Result<()> {
        let Some(grant) = self.state.user_tunnels().find_by_id(grant_id).await? else {
            return Ok(());
        };

        let now = chrono::Utc::now().timestamp_millis();
        let breached = quota_exceeded(grant.in_flow, grant.out_flow, grant.flow)
            || expired(grant.exp_time, now)
            || grant.status != UserTunnel::STATUS_ENABLED;

        if breached {
            self.pause_tunnel_forwards(grant.tunnel_id, user_id).await?;
        }
        Ok(())
    }

    /// Pause every ACTIVE forward of a user. Idempotent: forwards
    /// already paused are skipped, so a breach observed twice makes one
    /// state transition per forward.
    pub async fn pause_user_forwards(&self, user_id: i64) -> Result<()> {
        let forwards = self.state.forwards().find_by_user(user_id).await?;
        self.pause_all(forwards).await
    }

    /// Pause every ACTIVE forward of a user on one tunnel
    pub async fn pause_tunnel_forwards(&self, tunnel_id: i64, user_id: i64) -> Result<()> {
        let forwards = self
            .state
            .forwards()
            .find_by_user_and_tunnel(user_id, tunnel_id)
            .await?;
        self.pause_all(forwards).await
    }

    async fn pause_all(&self, forwards: Vec<Forward>) -> Result<()> {
        let orchestrator = ForwardService::new(self.state.clone());
        for forward in forwards {
            if forward.status != Forward::STATUS_ACTIVE {
                continue;
            }
            self.state
                .forwards()
                .set_status(forward.id, Forward::STATUS_PAUSED)
                .await?;
            orchestrator.push_pause(&forward).await;
        }
        Ok(())
    }

    /// Agent-side orphan GC, driven by config snapshots the agent posts.
    ///
    /// Deletes agent-side services, chains and limiters whose canonical
    /// name no longer resolves to a store row. Only agent state is
    /// touched, never authoritative rows.
    pub async fn gc_agent_config(&self, node_id: i64, snapshot: AgentSnapshot) -> Result<()> {
        let gost = crate::gost::Gost::new(self.state.sessions.clone());

        let mut orphan_entry: HashSet<String> = HashSet::new();
        let mut orphan_remote: HashSet<String> = HashSet::new();

        for item in &snapshot.services {
            let (base, remote) = match item.name.rsplit_once('_') {
                Some((base, "tls")) => (base, true),
                Some((base, "tcp" | "udp")) => (base, false),
                _ => continue,
            };
            let Some((forward_id, _, _)) = crate::gost::parse_service_name(base) else {
                continue;
            };
            if !self.state.forwards().exists(forward_id).await? {
                if remote {
                    orphan_remote.insert(base.to_string());
                } else {
                    orphan_entry.insert(base.to_string());
                }
            }
        }

        for base in &orphan_entry {
            let outcome = gost.delete_service(node_id, base).await;
            if !outcome.success {
                tracing::warn!(node_id, service = %base, message = %outcome.message, "orphan service delete failed");
            }
        }
        for base in &orphan_remote {
            let outcome = gost.delete_remote_service(node_id, base).await;
            if !outcome.success {
                tracing::warn!(node_id, service = %base, message = %outcome.message, "orphan remote service delete failed");
            }
        }

        for item in &snapshot.chains {
            let base = item.name.strip_suffix("_chains").unwrap_or(&item.name);
            let Some((forward_id, _, _)) = crate::gost::parse_service_name(base) else {
                continue;
            };
            if !self.state.forwards().exists(forward_id).await? {
                let outcome = gost.delete_chain(node_id, base).await;
                if !outcome.success {
                    tracing::warn!(node_id, chain = %base, message = %outcome.message, "orphan chain delete failed");
                }
            }
        }

        for item in &snapshot.limiters {
            let Ok(limiter_id) = item.name.parse::<i64>() else {
                continue;
            };
            if !self.state.speed_limits().exists(limiter_id).await? {
                let outcome = gost.delete_limiter(node_id, limiter_id).await;
                if !outcome.success {
                    tracing::warn!(node_id, limiter = limiter_id, message = %outcome.message, "orphan limiter delete failed");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribution_linearity() {
        // flow=2, ratio=1.0: both directions doubled
        assert_eq!(attribute(0, 100, 1.0, 2), (200, 0));
        assert_eq!(attribute(10, 20, 1.0, 2), (40, 20));
        // upload-only accounting still floors per report
        assert_eq!(attribute(3, 7, 1.5, 1), (10, 4));
    }

    #[test]
    fn test_attribution_floors_not_rounds() {
        assert_eq!(attribute(0, 1, 0.9, 1), (0, 0));
        assert_eq!(attribute(0, 199, 0.5, 1), (99, 0));
    }

    #[test]
    fn test_quota_threshold_is_inclusive() {
        let one_gb = BYTES_PER_GB;
        assert!(!quota_exceeded(one_gb - 10, 0, 1));
        assert!(quota_exceeded(one_gb - 10, 10, 1));
        assert!(quota_exceeded(one_gb, 0, 1));
    }

    #[test]
    fn test_expiry_rules() {
        assert!(!expired(0, 1_000));
        assert!(!expired(2_000, 1_000));
        assert!(expired(1_000, 1_000));
        assert!(expired(500, 1_000));
    }

    #[test]
    fn test_lock_registry_returns_same_lock_per_key() {
        let registry = FlowLockRegistry::new();
        let a = registry.forward(1);
        let b = registry.forward(1);
        let c = registry.forward(2);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        // maps are independent namespaces
        let u = registry.user(1);
        assert!(!Arc::ptr_eq(&a, &u));
    }

    #[tokio::test]
    async fn test_per_key_serialization() {
        // N tasks increment a plain counter under the per-key lock; with
        // serialization the final value is exactly N.
        let registry = Arc::new(FlowLockRegistry::new());
        let counter = Arc::new(Mutex::new(0i64));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let lock = registry.forward(9);
                let _guard = lock.lock().await;
                let current = *counter.lock().unwrap();
                tokio::task::yield_now().await;
                *counter.lock().unwrap() = current + 1;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*counter.lock().unwrap(), 32);
    }

    #[test]
    fn test_snapshot_parses_gost_dump() {
        let snapshot: AgentSnapshot = serde_json::from_str(
            r#"{"limiters":[{"name":"3"}],"chains":[{"name":"5_2_7_chains"}],"services":[{"name":"5_2_7_tcp"},{"name":"5_2_7_udp"},{"name":"5_2_7_tls"}]}"#,
        )
        .unwrap();
        assert_eq!(snapshot.limiters.len(), 1);
        assert_eq!(snapshot.chains.len(), 1);
        assert_eq!(snapshot.services.len(), 3);
    }
}
