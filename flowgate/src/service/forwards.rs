//! Forwarding-rule lifecycle orchestrator
//!
//! Translates "forward" records into concrete listener/chain/relay
//! configuration on one or two agents. Creation runs an explicit
//! compensation sequence so a partial failure never leaves half a
//! forward behind: every step that fails tears down what the previous
//! steps built and surfaces the first failure's message.

use std::collections::HashSet;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::gost::{service_name, Gost, RemoteServiceSpec, ServiceSpec};
use crate::middleware::Claims;
use crate::models::{Forward, Node, Tunnel, UserTunnel};
use crate::repository::NewForward;
use crate::state::AppState;

/// Probe target used to judge external reachability of a node
pub(crate) const EXTERNAL_PROBE_HOST: &str = "1.1.1.1";
pub(crate) const EXTERNAL_PROBE_PORT: i32 = 53;

/// Create-forward request
#[derive(Debug, Deserialize)]
pub struct CreateForwardRequest {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "tunnelId")]
    pub tunnel_id: i64,
    #[serde(rename = "remoteAddr")]
    pub remote_addr: String,
    #[serde(default)]
    pub strategy: String,
    #[serde(rename = "interfaceName", default)]
    pub interface_name: String,
    /// Caller-supplied entry port, overriding the allocator
    #[serde(rename = "inPort", default)]
    pub in_port: Option<i32>,
}

/// Update-forward request: scalar fields only, ports are never
/// re-allocated here
#[derive(Debug, Deserialize)]
pub struct UpdateForwardRequest {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "remoteAddr", default)]
    pub remote_addr: Option<String>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(rename = "interfaceName", default)]
    pub interface_name: Option<String>,
}

/// One entry of an update-order request
#[derive(Debug, Deserialize)]
pub struct OrderItem {
    pub id: i64,
    pub inx: i32,
}

/// Result of one diagnostic probe
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosisResult {
    #[serde(rename = "nodeId")]
    pub node_id: i64,
    #[serde(rename = "nodeName")]
    pub node_name: String,
    pub ip: String,
    pub port: i32,
    #[serde(rename = "averageTime")]
    pub average_time: f64,
    #[serde(rename = "packetLoss")]
    pub packet_loss: f64,
    pub description: String,
}

/// Pick a random free port in `[start, end]`, avoiding `used`
#[must_use]
pub fn pick_free_port(used: &HashSet<i32>, start: i32, end: i32) -> Option<i32> {
    if start <= 0 || end < start {
        return None;
    }
    let free: Vec<i32> = (start..=end).filter(|p| !used.contains(p)).collect();
    if free.is_empty() {
        return None;
    }
    let idx = rand::rng().random_range(0..free.len());
    Some(free[idx])
}

/// Split `host:port`, tolerating surrounding whitespace
#[must_use]
pub fn split_host_port(addr: &str) -> Option<(String, i32)> {
    let (host, port) = addr.trim().rsplit_once(':')?;
    let port = port.parse().ok()?;
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port))
}

/// The out-node address a chain dials: the tunnel's `out_ip` when set,
/// otherwise the out-node's server IP
fn out_address(tunnel: &Tunnel, out_node: &Node) -> String {
    if tunnel.out_ip.is_empty() {
        out_node.server_ip.clone()
    } else {
        tunnel.out_ip.clone()
    }
}

#[derive(Clone)]
pub struct ForwardService {
    state: AppState,
    gost: Gost,
}

impl ForwardService {
    #[must_use]
    pub fn new(state: AppState) -> Self {
        let gost = Gost::new(state.sessions.clone());
        Self { state, gost }
    }

    /// Forwards visible to the caller: admins see everything, regular
    /// users only their own rules. Always ordered by `inx`.
    pub async fn list(&self, claims: &Claims) -> Result<Vec<Forward>> {
        if claims.is_admin() {
            self.state.forwards().find_all().await
        } else {
            self.state.forwards().find_by_user(claims.sub).await
        }
    }

    /// Create a forward and materialize it on the agents.
    pub async fn create(&self, claims: &Claims, req: CreateForwardRequest) -> Result<Forward> {
        let tunnel = self
            .state
            .tunnels()
            .find_by_id(req.tunnel_id)
            .await?
            .ok_or_else(|| Error::not_found("隧道不存在"))?;

        let in_node = self
            .state
            .nodes()
            .find_by_id(tunnel.in_node_id)
            .await?
            .ok_or_else(|| Error::not_found("入口节点不存在"))?;

        let grant = self.resolve_grant(claims, &tunnel).await?;
        let grant_id = grant.as_ref().map_or(0, |g| g.id);
        let limiter = grant.as_ref().and_then(|g| g.speed_id);

        self.enforce_forward_quota(claims, &tunnel, grant.as_ref()).await?;

        // allocation and insert run under a per-tunnel lock so two
        // concurrent creates cannot pick the same free port
        let alloc_lock = self.state.alloc_locks.get(tunnel.id);
        let _alloc_guard = alloc_lock.lock().await;

        let in_port = self.resolve_in_port(&in_node, req.in_port).await?;

        let (out_node, out_port) = if tunnel.is_tunneled() {
            let out_node = self
                .state
                .nodes()
                .find_by_id(tunnel.out_node_id)
                .await?
                .ok_or_else(|| Error::not_found("出口节点不存在"))?;
            let out_port = self.allocate_port(&out_node).await?;
            (Some(out_node), out_port)
        } else {
            (None, 0)
        };

        let record = NewForward {
            user_id: claims.sub,
            user_name: claims.user.clone(),
            name: req.name,
            tunnel_id: tunnel.id,
            in_port,
            out_port,
            remote_addr: req.remote_addr,
            interface_name: req.interface_name,
            strategy: req.strategy,
            status: Forward::STATUS_ACTIVE,
        };
        let forward_id = self.state.forwards().create(&record).await?;
        drop(_alloc_guard);

        let name = service_name(forward_id, claims.sub, grant_id);
        if let Err(e) = self
            .configure_agents(&name, &record, &tunnel, &in_node, out_node.as_ref(), limiter)
            .await
        {
            // partial failure: the row must not survive its agent state
            self.state.forwards().delete(forward_id).await?;
            return Err(e);
        }

        let created = self
            .state
            .forwards()
            .find_by_id(forward_id)
            .await?
            .ok_or_else(|| Error::Internal("forward vanished after insert".to_string()))?;
        Ok(created)
    }

    /// Run the agent configuration sequence with compensation.
    ///
    /// Tunneled order: chain on the in-node, relay service on the
    /// out-node, entry services on the in-node; each failure unwinds
    /// every prior step. Port-forward topologies only need the last
    /// step.
    async fn configure_agents(
        &self,
        name: &str,
        record: &NewForward,
        tunnel: &Tunnel,
        in_node: &Node,
        out_node: Option<&Node>,
        limiter: Option<i64>,
    ) -> Result<()> {
        if let Some(out_node) = out_node {
            let chain_target = format!("{}:{}", out_address(tunnel, out_node), record.out_port);
            let outcome = self
                .gost
                .add_chain(in_node.id, name, &chain_target, &tunnel.protocol, &tunnel.interface_name)
                .await;
            if !outcome.success {
                self.gost.delete_chain(in_node.id, name).await;
                return Err(Error::Agent(outcome.message));
            }

            let remote_spec = RemoteServiceSpec {
                name,
                out_port: record.out_port,
                remote_addr: &record.remote_addr,
                protocol: &tunnel.protocol,
                strategy: &record.strategy,
                interface_name: &record.interface_name,
            };
            let outcome = self.gost.add_remote_service(out_node.id, &remote_spec).await;
            if !outcome.success {
                self.gost.delete_chain(in_node.id, name).await;
                self.gost.delete_remote_service(out_node.id, name).await;
                return Err(Error::Agent(outcome.message));
            }
        }

        let spec = ServiceSpec {
            name,
            in_port: record.in_port,
            limiter,
            remote_addr: &record.remote_addr,
            tunnel,
            strategy: &record.strategy,
            interface_name: &record.interface_name,
        };
        let outcome = self.gost.add_service(in_node.id, &spec).await;
        if !outcome.success {
            if let Some(out_node) = out_node {
                self.gost.delete_chain(in_node.id, name).await;
                self.gost.delete_remote_service(out_node.id, name).await;
            }
            self.gost.delete_service(in_node.id, name).await;
            return Err(Error::Agent(outcome.message));
        }

        Ok(())
    }

    async fn resolve_grant(&self, claims: &Claims, tunnel: &Tunnel) -> Result<Option<UserTunnel>> {
        if claims.is_admin() {
            return Ok(None);
        }
        let grant = self
            .state
            .user_tunnels()
            .find_by_user_and_tunnel(claims.sub, tunnel.id)
            .await?
            .ok_or_else(|| Error::not_found("无该隧道的使用权限"))?;
        if grant.status != UserTunnel::STATUS_ENABLED {
            return Err(Error::conflict("隧道权限已停用"));
        }
        Ok(Some(grant))
    }

    async fn enforce_forward_quota(
        &self,
        claims: &Claims,
        tunnel: &Tunnel,
        grant: Option<&UserTunnel>,
    ) -> Result<()> {
        if let Some(grant) = grant {
            if grant.num > 0 {
                let used = self
                    .state
                    .forwards()
                    .count_by_user_and_tunnel(claims.sub, tunnel.id)
                    .await?;
                if used >= i64::from(grant.num) {
                    return Err(Error::conflict("该隧道的转发数量已达上限"));
                }
            }
        }

        if !claims.is_admin() {
            if let Some(user) = self.state.users().find_by_id(claims.sub).await? {
                if user.num > 0 {
                    let used = self.state.forwards().count_by_user(claims.sub).await?;
                    if used >= i64::from(user.num) {
                        return Err(Error::conflict("转发数量已达上限"));
                    }
                }
            }
        }

        Ok(())
    }

    async fn resolve_in_port(&self, node: &Node, requested: Option<i32>) -> Result<i32> {
        match requested {
            Some(port) => {
                if port < node.port_sta || port > node.port_end {
                    return Err(Error::bad_request("端口不在节点端口范围内"));
                }
                let used = self.state.forwards().used_ports(node.id).await?;
                if used.contains(&port) {
                    return Err(Error::conflict("端口已被占用"));
                }
                Ok(port)
            }
            None => self.allocate_port(node).await,
        }
    }

    /// Pick a random unused port within the node's range.
    ///
    /// Used ports are computed by joining forwards through their tunnels
    /// to the node in both roles (entry and relay).
    async fn allocate_port(&self, node: &Node) -> Result<i32> {
        let used: HashSet<i32> = self
            .state
            .forwards()
            .used_ports(node.id)
            .await?
            .into_iter()
            .collect();
        pick_free_port(&used, node.port_sta, node.port_end).ok_or(Error::NoFreePort)
    }

    /// Replace scalar fields. Agent state is intentionally left alone;
    /// pause/resume re-syncs it.
    pub async fn update(&self, claims: &Claims, req: UpdateForwardRequest) -> Result<()> {
        let mut forward = self.owned_forward(claims, req.id).await?;

        if let Some(name) = req.name {
            forward.name = name;
        }
        if let Some(remote_addr) = req.remote_addr {
            forward.remote_addr = remote_addr;
        }
        if let Some(strategy) = req.strategy {
            forward.strategy = strategy;
        }
        if let Some(interface_name) = req.interface_name {
            forward.interface_name = interface_name;
        }

        self.state.forwards().update(&forward).await
    }

    /// Pause: the DB status change always stands; agent-side pausing is
    /// best-effort and retried by the quota pipeline.
    pub async fn pause(&self, claims: &Claims, id: i64) -> Result<()> {
        let forward = self.owned_forward(claims, id).await?;
        self.state
            .forwards()
            .set_status(id, Forward::STATUS_PAUSED)
            .await?;
        self.push_pause(&forward).await;
        Ok(())
    }

    pub async fn resume(&self, claims: &Claims, id: i64) -> Result<()> {
        let forward = self.owned_forward(claims, id).await?;
        self.state
            .forwards()
            .set_status(id, Forward::STATUS_ACTIVE)
            .await?;
        self.push_resume(&forward).await;
        Ok(())
    }

    /// Delete with best-effort agent cleanup. The agent's periodic
    /// config GC reaps anything this misses.
    pub async fn delete(&self, claims: &Claims, id: i64) -> Result<()> {
        let forward = self.owned_forward(claims, id).await?;
        self.cleanup_agents(&forward).await;
        self.state.forwards().delete(id).await
    }

    /// Hard delete of the row only; no agent traffic
    pub async fn force_delete(&self, id: i64) -> Result<()> {
        self.state.forwards().delete(id).await
    }

    pub async fn update_order(&self, items: Vec<OrderItem>) -> Result<()> {
        for item in items {
            self.state.forwards().update_order(item.id, item.inx).await?;
        }
        Ok(())
    }

    /// TCP-probe the forward's path per topology: a port-forward probes
    /// every remote from the in-node; a tunneled rule probes the relay
    /// hop first and then every remote from the out-node.
    pub async fn diagnose(&self, claims: &Claims, id: i64) -> Result<Vec<DiagnosisResult>> {
        let forward = self.owned_forward(claims, id).await?;
        let tunnel = self
            .state
            .tunnels()
            .find_by_id(forward.tunnel_id)
            .await?
            .ok_or_else(|| Error::not_found("隧道不存在"))?;
        let in_node = self
            .state
            .nodes()
            .find_by_id(tunnel.in_node_id)
            .await?
            .ok_or_else(|| Error::not_found("入口节点不存在"))?;

        let mut results = Vec::new();

        if tunnel.is_tunneled() {
            let out_node = self
                .state
                .nodes()
                .find_by_id(tunnel.out_node_id)
                .await?
                .ok_or_else(|| Error::not_found("出口节点不存在"))?;

            let relay_ip = out_address(&tunnel, &out_node);
            results.push(
                self.probe(&in_node, &relay_ip, forward.out_port, "入口 → 出口")
                    .await,
            );

            for addr in forward.remote_addr.split(',') {
                if let Some((host, port)) = split_host_port(addr) {
                    results.push(self.probe(&out_node, &host, port, "出口 → 目标").await);
                }
            }
        } else {
            for addr in forward.remote_addr.split(',') {
                if let Some((host, port)) = split_host_port(addr) {
                    results.push(self.probe(&in_node, &host, port, "入口 → 目标").await);
                }
            }
        }

        Ok(results)
    }

    /// Probe a target from a node. A node without a live session yields
    /// a total-loss result instead of failing the whole diagnosis.
    pub(crate) async fn probe(&self, node: &Node, ip: &str, port: i32, description: &str) -> DiagnosisResult {
        let mut result = DiagnosisResult {
            node_id: node.id,
            node_name: node.name.clone(),
            ip: ip.to_string(),
            port,
            average_time: -1.0,
            packet_loss: 100.0,
            description: description.to_string(),
        };

        if !self.state.sessions.is_connected(node.id) {
            return result;
        }

        let outcome = self.gost.tcp_ping(node.id, ip, port).await;
        if outcome.success {
            if let Some(data) = outcome.data {
                result.average_time = ping_field(&data, "averageTime").unwrap_or(-1.0);
                result.packet_loss = ping_field(&data, "packetLoss").unwrap_or(100.0);
            }
        }
        result
    }

    /// DB pause already happened; mirror it on the agents. Missing
    /// tunnel or grant rows are tolerated (already reaped).
    pub(crate) async fn push_pause(&self, forward: &Forward) {
        let Some((tunnel, name)) = self.agent_context(forward).await else {
            return;
        };

        let outcome = self.gost.pause_service(tunnel.in_node_id, &name).await;
        if !outcome.success {
            tracing::warn!(forward = forward.id, message = %outcome.message, "pause service failed");
        }
        if tunnel.is_tunneled() {
            let outcome = self.gost.pause_remote_service(tunnel.out_node_id, &name).await;
            if !outcome.success {
                tracing::warn!(forward = forward.id, message = %outcome.message, "pause remote service failed");
            }
        }
    }

    pub(crate) async fn push_resume(&self, forward: &Forward) {
        let Some((tunnel, name)) = self.agent_context(forward).await else {
            return;
        };

        let outcome = self.gost.resume_service(tunnel.in_node_id, &name).await;
        if !outcome.success {
            tracing::warn!(forward = forward.id, message = %outcome.message, "resume service failed");
        }
        if tunnel.is_tunneled() {
            let outcome = self.gost.resume_remote_service(tunnel.out_node_id, &name).await;
            if !outcome.success {
                tracing::warn!(forward = forward.id, message = %outcome.message, "resume remote service failed");
            }
        }
    }

    async fn cleanup_agents(&self, forward: &Forward) {
        let Some((tunnel, name)) = self.agent_context(forward).await else {
            return;
        };

        self.gost.delete_service(tunnel.in_node_id, &name).await;
        if tunnel.is_tunneled() {
            self.gost.delete_chain(tunnel.in_node_id, &name).await;
            self.gost.delete_remote_service(tunnel.out_node_id, &name).await;
        }
    }

    /// Tunnel and canonical service name for a forward, or None when the
    /// tunnel row is gone
    async fn agent_context(&self, forward: &Forward) -> Option<(Tunnel, String)> {
        let tunnel = match self.state.tunnels().find_by_id(forward.tunnel_id).await {
            Ok(Some(tunnel)) => tunnel,
            _ => return None,
        };

        let grant_id = match self
            .state
            .user_tunnels()
            .find_by_user_and_tunnel(forward.user_id, forward.tunnel_id)
            .await
        {
            Ok(Some(grant)) => grant.id,
            _ => 0,
        };

        let name = service_name(forward.id, forward.user_id, grant_id);
        Some((tunnel, name))
    }

    async fn owned_forward(&self, claims: &Claims, id: i64) -> Result<Forward> {
        let forward = self
            .state
            .forwards()
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::not_found("转发不存在"))?;
        if !claims.is_admin() && forward.user_id != claims.sub {
            return Err(Error::not_found("转发不存在"));
        }
        Ok(forward)
    }
}

fn ping_field(data: &Value, key: &str) -> Option<f64> {
    data.get(key).and_then(Value::as_f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_free_port_within_range() {
        let used = HashSet::new();
        for _ in 0..50 {
            let port = pick_free_port(&used, 40000, 40010).unwrap();
            assert!((40000..=40010).contains(&port));
        }
    }

    #[test]
    fn test_pick_free_port_avoids_used() {
        let used: HashSet<i32> = (40000..=40009).collect();
        assert_eq!(pick_free_port(&used, 40000, 40010), Some(40010));
    }

    #[test]
    fn test_pick_free_port_exhausted() {
        let used: HashSet<i32> = (40000..=40010).collect();
        assert_eq!(pick_free_port(&used, 40000, 40010), None);
    }

    #[test]
    fn test_pick_free_port_rejects_bad_range() {
        let used = HashSet::new();
        assert_eq!(pick_free_port(&used, 0, 100), None);
        assert_eq!(pick_free_port(&used, 5000, 4000), None);
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("1.2.3.4:80"), Some(("1.2.3.4".to_string(), 80)));
        assert_eq!(split_host_port(" example.com:443 "), Some(("example.com".to_string(), 443)));
        assert_eq!(split_host_port("no-port"), None);
        assert_eq!(split_host_port(":80"), None);
        assert_eq!(split_host_port("host:notaport"), None);
    }

    #[test]
    fn test_ping_field_extraction() {
        let data = serde_json::json!({"averageTime": 12.5, "packetLoss": 0});
        assert_eq!(ping_field(&data, "averageTime"), Some(12.5));
        assert_eq!(ping_field(&data, "packetLoss"), Some(0.0));
        assert_eq!(ping_field(&data, "missing"), None);
    }
}
