//! Tunnel management and user-tunnel grants

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::{Tunnel, UserTunnel};
use crate::service::forwards::{
    DiagnosisResult, ForwardService, EXTERNAL_PROBE_HOST, EXTERNAL_PROBE_PORT,
};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateTunnelRequest {
    pub name: String,
    #[serde(rename = "inNodeId")]
    pub in_node_id: i64,
    #[serde(rename = "outNodeId", default)]
    pub out_node_id: i64,
    #[serde(rename = "type", default = "default_tunnel_type")]
    pub tunnel_type: i32,
    #[serde(default = "default_flow")]
    pub flow: i32,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(rename = "trafficRatio", default)]
    pub traffic_ratio: Option<f64>,
    #[serde(rename = "tcpListenAddr", default)]
    pub tcp_listen_addr: String,
    #[serde(rename = "udpListenAddr", default)]
    pub udp_listen_addr: String,
    #[serde(rename = "interfaceName", default)]
    pub interface_name: String,
}

fn default_tunnel_type() -> i32 {
    Tunnel::TYPE_PORT_FORWARD
}

fn default_flow() -> i32 {
    2
}

fn default_protocol() -> String {
    "tls".to_string()
}

#[derive(Debug, Deserialize)]
pub struct UpdateTunnelRequest {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "inNodeId", default)]
    pub in_node_id: Option<i64>,
    #[serde(rename = "outNodeId", default)]
    pub out_node_id: Option<i64>,
    #[serde(rename = "type", default)]
    pub tunnel_type: Option<i32>,
    #[serde(default)]
    pub flow: Option<i32>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(rename = "trafficRatio", default)]
    pub traffic_ratio: Option<f64>,
    #[serde(rename = "tcpListenAddr", default)]
    pub tcp_listen_addr: Option<String>,
    #[serde(rename = "udpListenAddr", default)]
    pub udp_listen_addr: Option<String>,
    #[serde(rename = "interfaceName", default)]
    pub interface_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignGrantRequest {
    #[serde(rename = "userId")]
    pub user_id: i64,
    #[serde(rename = "tunnelId")]
    pub tunnel_id: i64,
    #[serde(rename = "expTime", default)]
    pub exp_time: i64,
    #[serde(default)]
    pub flow: i64,
    #[serde(rename = "flowResetTime", default)]
    pub flow_reset_time: i64,
    #[serde(default)]
    pub num: i32,
    #[serde(rename = "speedId", default)]
    pub speed_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateGrantRequest {
    pub id: i64,
    #[serde(rename = "expTime", default)]
    pub exp_time: Option<i64>,
    #[serde(default)]
    pub flow: Option<i64>,
    #[serde(rename = "flowResetTime", default)]
    pub flow_reset_time: Option<i64>,
    #[serde(default)]
    pub num: Option<i32>,
    #[serde(rename = "speedId", default)]
    pub speed_id: Option<i64>,
}

#[derive(Clone)]
pub struct TunnelService {
    state: AppState,
}

impl TunnelService {
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub async fn create(&self, req: CreateTunnelRequest) -> Result<i64> {
        if self.state.nodes().find_by_id(req.in_node_id).await?.is_none() {
            return Err(Error::not_found("入口节点不存在"));
        }
        if req.tunnel_type == Tunnel::TYPE_TUNNELED
            && self.state.nodes().find_by_id(req.out_node_id).await?.is_none()
        {
            return Err(Error::not_found("出口节点不存在"));
        }

        let tunnel = Tunnel {
            id: 0,
            name: req.name,
            in_node_id: req.in_node_id,
            in_ip: String::new(),
            out_node_id: req.out_node_id,
            out_ip: String::new(),
            tunnel_type: req.tunnel_type,
            flow: req.flow,
            protocol: req.protocol,
            traffic_ratio: req.traffic_ratio.unwrap_or(1.0),
            tcp_listen_addr: req.tcp_listen_addr,
            udp_listen_addr: req.udp_listen_addr,
            interface_name: req.interface_name,
            status: 0,
            created_time: 0,
            updated_time: 0,
        };
        self.state.tunnels().create(&tunnel).await
    }

    pub async fn list(&self) -> Result<Vec<Tunnel>> {
        self.state.tunnels().find_all().await
    }

    pub async fn get(&self, id: i64) -> Result<Tunnel> {
        self.state
            .tunnels()
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::not_found("隧道不存在"))
    }

    pub async fn update(&self, req: UpdateTunnelRequest) -> Result<()> {
        let mut tunnel = self.get(req.id).await?;

        if let Some(name) = req.name {
            tunnel.name = name;
        }
        if let Some(in_node_id) = req.in_node_id {
            tunnel.in_node_id = in_node_id;
        }
        if let Some(out_node_id) = req.out_node_id {
            tunnel.out_node_id = out_node_id;
        }
        if let Some(tunnel_type) = req.tunnel_type {
            tunnel.tunnel_type = tunnel_type;
        }
        if let Some(flow) = req.flow {
            tunnel.flow = flow;
        }
        if let Some(protocol) = req.protocol {
            tunnel.protocol = protocol;
        }
        if let Some(traffic_ratio) = req.traffic_ratio {
            tunnel.traffic_ratio = traffic_ratio;
        }
        if let Some(tcp_listen_addr) = req.tcp_listen_addr {
            tunnel.tcp_listen_addr = tcp_listen_addr;
        }
        if let Some(udp_listen_addr) = req.udp_listen_addr {
            tunnel.udp_listen_addr = udp_listen_addr;
        }
        if let Some(interface_name) = req.interface_name {
            tunnel.interface_name = interface_name;
        }

        self.state.tunnels().update(&tunnel).await
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        self.get(id).await?;
        self.state.tunnels().soft_delete(id).await
    }

    /// Probe the tunnel's relay link and external reachability from each
    /// endpoint. Disconnected nodes yield total-loss entries instead of
    /// an error.
    pub async fn diagnose(&self, id: i64) -> Result<Vec<DiagnosisResult>> {
        let tunnel = self.get(id).await?;
        let forwards = ForwardService::new(self.state.clone());

        let in_node = self
            .state
            .nodes()
            .find_by_id(tunnel.in_node_id)
            .await?
            .ok_or_else(|| Error::not_found("入口节点不存在"))?;

        let mut results = Vec::new();

        results.push(
            forwards
                .probe(&in_node, EXTERNAL_PROBE_HOST, EXTERNAL_PROBE_PORT, "入口 → 外部")
                .await,
        );

        if tunnel.is_tunneled() {
            let out_node = self
                .state
                .nodes()
                .find_by_id(tunnel.out_node_id)
                .await?
                .ok_or_else(|| Error::not_found("出口节点不存在"))?;

            // relay reachability: the out-node's TLS listener when it
            // advertises one, else the conventional relay port
            let relay_ip = if tunnel.out_ip.is_empty() {
                out_node.server_ip.clone()
            } else {
                tunnel.out_ip.clone()
            };
            let relay_port = if out_node.tls > 0 { out_node.tls } else { 443 };
            results.push(forwards.probe(&in_node, &relay_ip, relay_port, "入口 → 出口").await);
            results.push(
                forwards
                    .probe(&out_node, EXTERNAL_PROBE_HOST, EXTERNAL_PROBE_PORT, "出口 → 外部")
                    .await,
            );
        }

        Ok(results)
    }

    // ------------------------------------------------------------------
    // User-tunnel grants
    // ------------------------------------------------------------------

    pub async fn assign_grant(&self, req: AssignGrantRequest) -> Result<i64> {
        self.get(req.tunnel_id).await?;
        if self.state.users().find_by_id(req.user_id).await?.is_none() {
            return Err(Error::not_found("用户不存在"));
        }
        if self
            .state
            .user_tunnels()
            .find_by_user_and_tunnel(req.user_id, req.tunnel_id)
            .await?
            .is_some()
        {
            return Err(Error::conflict("该用户已拥有此隧道的权限"));
        }

        let grant = UserTunnel {
            id: 0,
            user_id: req.user_id,
            tunnel_id: req.tunnel_id,
            exp_time: req.exp_time,
            flow: req.flow,
            in_flow: 0,
            out_flow: 0,
            flow_reset_time: req.flow_reset_time,
            num: req.num,
            speed_id: req.speed_id,
            status: UserTunnel::STATUS_ENABLED,
            created_time: 0,
            updated_time: 0,
        };
        self.state.user_tunnels().create(&grant).await
    }

    pub async fn list_grants(&self, tunnel_id: Option<i64>, user_id: Option<i64>) -> Result<Vec<UserTunnel>> {
        match (tunnel_id, user_id) {
            (Some(tunnel_id), _) => self.state.user_tunnels().find_by_tunnel(tunnel_id).await,
            (None, Some(user_id)) => self.state.user_tunnels().find_by_user(user_id).await,
            (None, None) => self.state.user_tunnels().find_all().await,
        }
    }

    pub async fn update_grant(&self, req: UpdateGrantRequest) -> Result<()> {
        let mut grant = self
            .state
            .user_tunnels()
            .find_by_id(req.id)
            .await?
            .ok_or_else(|| Error::not_found("隧道权限不存在"))?;

        if let Some(exp_time) = req.exp_time {
            grant.exp_time = exp_time;
        }
        if let Some(flow) = req.flow {
            grant.flow = flow;
        }
        if let Some(flow_reset_time) = req.flow_reset_time {
            grant.flow_reset_time = flow_reset_time;
        }
        if let Some(num) = req.num {
            grant.num = num;
        }
        if req.speed_id.is_some() {
            grant.speed_id = req.speed_id;
        }

        self.state.user_tunnels().update(&grant).await
    }

    /// Remove a grant and hard-delete the user's forwards on the
    /// tunnel; leftover agent state is reaped by the orphan GC.
    pub async fn remove_grant(&self, id: i64) -> Result<()> {
        let grant = self
            .state
            .user_tunnels()
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::not_found("隧道权限不存在"))?;

        let forwards = self
            .state
            .forwards()
            .find_by_user_and_tunnel(grant.user_id, grant.tunnel_id)
            .await?;
        let orchestrator = ForwardService::new(self.state.clone());
        for forward in forwards {
            orchestrator.force_delete(forward.id).await?;
        }

        self.state.user_tunnels().delete(id).await
    }
}
