//! Agent-config shim
//!
//! Translates rule-level intent into the concrete service, chain and
//! limiter descriptors a forwarding agent consumes, and issues them
//! over the node session layer. Agent failures never panic the caller:
//! every operation returns a [`GostOutcome`] carrying the agent's (or
//! the session layer's) verdict.
//!
//! Naming scheme on the agent: a forward's canonical service name is
//! `<forwardId>_<userId>_<grantId>`; concrete services append a
//! `_tcp`/`_udp`/`_tls` suffix and chains append `_chains`.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::Error;
use crate::models::Tunnel;
use crate::session::{MessageType, SessionRegistry};

/// Selector fail limit pushed with every forwarder
const SELECTOR_MAX_FAILS: i32 = 1;
/// Selector fail timeout pushed with every forwarder
const SELECTOR_FAIL_TIMEOUT: &str = "600s";
/// Default remote-selection strategy
const DEFAULT_STRATEGY: &str = "fifo";

/// Canonical service name for a forward.
///
/// `grant_id` is 0 for admin-owned forwards without a grant.
#[must_use]
pub fn service_name(forward_id: i64, user_id: i64, grant_id: i64) -> String {
    format!("{forward_id}_{user_id}_{grant_id}")
}

/// Decompose a canonical service name back into its ids.
///
/// Accepts names with a protocol suffix (`_tcp`, `_udp`, `_tls`) or a
/// `_chains` suffix; anything that does not start with three integer
/// fields is rejected.
#[must_use]
pub fn parse_service_name(name: &str) -> Option<(i64, i64, i64)> {
    let mut parts = name.split('_');
    let forward_id = parts.next()?.parse().ok()?;
    let user_id = parts.next()?.parse().ok()?;
    let grant_id = parts.next()?.parse().ok()?;
    Some((forward_id, user_id, grant_id))
}

/// Outcome of one agent mutation
#[derive(Debug, Clone)]
pub struct GostOutcome {
    pub success: bool,
    pub message: String,
    pub data: Option<Value>,
}

impl GostOutcome {
    /// Promote a failed outcome into the error channel
    pub fn into_result(self) -> Result<(), Error> {
        if self.success {
            Ok(())
        } else {
            Err(Error::Agent(self.message))
        }
    }
}

/// Everything needed to materialize a forward's entry services
#[derive(Debug)]
pub struct ServiceSpec<'a> {
    pub name: &'a str,
    pub in_port: i32,
    pub limiter: Option<i64>,
    pub remote_addr: &'a str,
    pub tunnel: &'a Tunnel,
    pub strategy: &'a str,
    pub interface_name: &'a str,
}

/// Everything needed to materialize the out-node relay service
#[derive(Debug)]
pub struct RemoteServiceSpec<'a> {
    pub name: &'a str,
    pub out_port: i32,
    pub remote_addr: &'a str,
    pub protocol: &'a str,
    pub strategy: &'a str,
    pub interface_name: &'a str,
}

/// Build one entry-service descriptor for a protocol (`tcp` or `udp`).
fn build_service(spec: &ServiceSpec<'_>, protocol: &str) -> Value {
    let mut service = json!({
        "name": format!("{}_{}", spec.name, protocol),
    });

    let listen_addr = match protocol {
        "tcp" => &spec.tunnel.tcp_listen_addr,
        _ => &spec.tunnel.udp_listen_addr,
    };
    service["addr"] = json!(format!("{}:{}", listen_addr, spec.in_port));

    if !spec.interface_name.is_empty() {
        service["metadata"] = json!({ "interface": spec.interface_name });
    }

    if let Some(limiter) = spec.limiter {
        service["limiter"] = json!(limiter.to_string());
    }

    let mut handler = json!({ "type": protocol });
    if spec.tunnel.tunnel_type != Tunnel::TYPE_PORT_FORWARD {
        handler["chain"] = json!(format!("{}_chains", spec.name));
    }
    service["handler"] = handler;

    let mut listener = json!({ "type": protocol });
    if protocol == "udp" {
        listener["metadata"] = json!({ "keepAlive": true });
    }
    service["listener"] = listener;

    if spec.tunnel.tunnel_type == Tunnel::TYPE_PORT_FORWARD && !spec.remote_addr.is_empty() {
        service["forwarder"] = build_forwarder(spec.remote_addr, spec.strategy);
    }

    service
}

/// Build the relay-service descriptor placed on the out-node.
fn build_remote_service(spec: &RemoteServiceSpec<'_>) -> Value {
    let mut service = json!({
        "name": format!("{}_tls", spec.name),
        "addr": format!(":{}", spec.out_port),
    });

    if !spec.interface_name.is_empty() {
        service["metadata"] = json!({ "interface": spec.interface_name });
    }

    service["handler"] = json!({ "type": "relay" });
    service["listener"] = json!({ "type": spec.protocol });
    service["forwarder"] = build_forwarder(spec.remote_addr, spec.strategy);

    service
}

/// Build the chain descriptor: one hop, one relay-connector node
/// targeting the out-node's listener.
fn build_chain(name: &str, target_addr: &str, protocol: &str, interface_name: &str) -> Value {
    let mut dialer = json!({ "type": protocol });
    if protocol == "quic" {
        dialer["metadata"] = json!({ "keepAlive": true, "ttl": "10s" });
    }

    let mut node = json!({
        "name": format!("node-{name}"),
        "addr": target_addr,
        "connector": { "type": "relay" },
        "dialer": dialer,
    });

    if !interface_name.is_empty() {
        node["interface"] = json!(interface_name);
    }

    json!({
        "name": format!("{name}_chains"),
        "hops": [{
            "name": format!("hop-{name}"),
            "nodes": [node],
        }],
    })
}

/// Split a comma-separated `host:port` list into forwarder nodes with
/// the selector policy attached.
fn build_forwarder(remote_addr: &str, strategy: &str) -> Value {
    let nodes: Vec<Value> = remote_addr
        .split(',')
        .enumerate()
        .map(|(i, addr)| {
            json!({
                "name": format!("node_{}", i + 1),
                "addr": addr.trim(),
            })
        })
        .collect();

    let strategy = if strategy.is_empty() { DEFAULT_STRATEGY } else { strategy };

    json!({
        "nodes": nodes,
        "selector": {
            "strategy": strategy,
            "maxFails": SELECTOR_MAX_FAILS,
            "failTimeout": SELECTOR_FAIL_TIMEOUT,
        },
    })
}

fn build_limiter(id: i64, speed: i32) -> Value {
    json!({
        "name": id.to_string(),
        "limits": [format!("$ {speed}MB {speed}MB")],
    })
}

/// Issues agent mutations through the session registry
#[derive(Clone)]
pub struct Gost {
    sessions: Arc<SessionRegistry>,
}

impl Gost {
    #[must_use]
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self { sessions }
    }

    async fn dispatch(&self, node_id: i64, data: Value, kind: MessageType) -> GostOutcome {
        match self.sessions.request(node_id, data, kind).await {
            Ok(reply) => GostOutcome {
                success: reply.success,
                message: reply.message,
                data: reply.data,
            },
            Err(e) => GostOutcome {
                success: false,
                message: e.to_string(),
                data: None,
            },
        }
    }

    /// Push the TCP and UDP entry services for a forward
    pub async fn add_service(&self, node_id: i64, spec: &ServiceSpec<'_>) -> GostOutcome {
        let services = vec![build_service(spec, "tcp"), build_service(spec, "udp")];
        self.dispatch(node_id, json!(services), MessageType::AddService).await
    }

    pub async fn update_service(&self, node_id: i64, spec: &ServiceSpec<'_>) -> GostOutcome {
        let services = vec![build_service(spec, "tcp"), build_service(spec, "udp")];
        self.dispatch(node_id, json!(services), MessageType::UpdateService).await
    }

    pub async fn delete_service(&self, node_id: i64, name: &str) -> GostOutcome {
        let data = json!({ "services": [format!("{name}_tcp"), format!("{name}_udp")] });
        self.dispatch(node_id, data, MessageType::DeleteService).await
    }

    pub async fn pause_service(&self, node_id: i64, name: &str) -> GostOutcome {
        let data = json!({ "services": [format!("{name}_tcp"), format!("{name}_udp")] });
        self.dispatch(node_id, data, MessageType::PauseService).await
    }

    pub async fn resume_service(&self, node_id: i64, name: &str) -> GostOutcome {
        let data = json!({ "services": [format!("{name}_tcp"), format!("{name}_udp")] });
        self.dispatch(node_id, data, MessageType::ResumeService).await
    }

    /// Push the out-node relay service of a tunneled forward
    pub async fn add_remote_service(&self, node_id: i64, spec: &RemoteServiceSpec<'_>) -> GostOutcome {
        let services = vec![build_remote_service(spec)];
        self.dispatch(node_id, json!(services), MessageType::AddService).await
    }

    pub async fn update_remote_service(&self, node_id: i64, spec: &RemoteServiceSpec<'_>) -> GostOutcome {
        let services = vec![build_remote_service(spec)];
        self.dispatch(node_id, json!(services), MessageType::UpdateService).await
    }

    pub async fn delete_remote_service(&self, node_id: i64, name: &str) -> GostOutcome {
        let data = json!({ "services": [format!("{name}_tls")] });
        self.dispatch(node_id, data, MessageType::DeleteService).await
    }

    pub async fn pause_remote_service(&self, node_id: i64, name: &str) -> GostOutcome {
        let data = json!({ "services": [format!("{name}_tls")] });
        self.dispatch(node_id, data, MessageType::PauseService).await
    }

    pub async fn resume_remote_service(&self, node_id: i64, name: &str) -> GostOutcome {
        let data = json!({ "services": [format!("{name}_tls")] });
        self.dispatch(node_id, data, MessageType::ResumeService).await
    }

    /// Push the in-node chain toward the out-node's relay listener
    pub async fn add_chain(&self, node_id: i64, name: &str, target_addr: &str, protocol: &str, interface_name: &str) -> GostOutcome {
        let data = build_chain(name, target_addr, protocol, interface_name);
        self.dispatch(node_id, data, MessageType::AddChains).await
    }

    pub async fn update_chain(&self, node_id: i64, name: &str, target_addr: &str, protocol: &str, interface_name: &str) -> GostOutcome {
        let data = json!({
            "chain": format!("{name}_chains"),
            "data": build_chain(name, target_addr, protocol, interface_name),
        });
        self.dispatch(node_id, data, MessageType::UpdateChains).await
    }

    pub async fn delete_chain(&self, node_id: i64, name: &str) -> GostOutcome {
        let data = json!({ "chain": format!("{name}_chains") });
        self.dispatch(node_id, data, MessageType::DeleteChains).await
    }

    /// Limiters are named by their speed-limit row id
    pub async fn add_limiter(&self, node_id: i64, id: i64, speed: i32) -> GostOutcome {
        self.dispatch(node_id, build_limiter(id, speed), MessageType::AddLimiters).await
    }

    pub async fn update_limiter(&self, node_id: i64, id: i64, speed: i32) -> GostOutcome {
        let data = json!({
            "limiter": id.to_string(),
            "data": build_limiter(id, speed),
        });
        self.dispatch(node_id, data, MessageType::UpdateLimiters).await
    }

    pub async fn delete_limiter(&self, node_id: i64, id: i64) -> GostOutcome {
        let data = json!({ "limiter": id.to_string() });
        self.dispatch(node_id, data, MessageType::DeleteLimiters).await
    }

    /// Ask the agent to TCP-ping a target
    pub async fn tcp_ping(&self, node_id: i64, ip: &str, port: i32) -> GostOutcome {
        let data = json!({ "ip": ip, "port": port, "count": 4, "timeout": 5000 });
        self.dispatch(node_id, data, MessageType::TcpPing).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port_forward_tunnel() -> Tunnel {
        Tunnel {
            id: 1,
            name: "edge".to_string(),
            in_node_id: 10,
            in_ip: "203.0.113.1".to_string(),
            out_node_id: 0,
            out_ip: String::new(),
            tunnel_type: Tunnel::TYPE_PORT_FORWARD,
            flow: 2,
            protocol: "tls".to_string(),
            traffic_ratio: 1.0,
            tcp_listen_addr: String::new(),
            udp_listen_addr: String::new(),
            interface_name: String::new(),
            status: 0,
            created_time: 0,
            updated_time: 0,
        }
    }

    fn tunneled_tunnel() -> Tunnel {
        Tunnel {
            tunnel_type: Tunnel::TYPE_TUNNELED,
            out_node_id: 20,
            out_ip: "198.51.100.9".to_string(),
            protocol: "quic".to_string(),
            ..port_forward_tunnel()
        }
    }

    #[test]
    fn test_service_name_round_trip() {
        let name = service_name(12, 34, 56);
        assert_eq!(name, "12_34_56");
        assert_eq!(parse_service_name(&name), Some((12, 34, 56)));
        assert_eq!(parse_service_name("12_34_56_tcp"), Some((12, 34, 56)));
        assert_eq!(parse_service_name("12_34_0_chains"), Some((12, 34, 0)));
        assert_eq!(parse_service_name("web_api"), None);
        assert_eq!(parse_service_name("12"), None);
    }

    #[test]
    fn test_port_forward_service_shape() {
        let tunnel = port_forward_tunnel();
        let spec = ServiceSpec {
            name: "5_2_0",
            in_port: 40001,
            limiter: None,
            remote_addr: "1.2.3.4:80,1.2.3.5:80",
            tunnel: &tunnel,
            strategy: "fifo",
            interface_name: "",
        };

        let service = build_service(&spec, "tcp");
        assert_eq!(service["name"], "5_2_0_tcp");
        assert_eq!(service["addr"], ":40001");
        assert_eq!(service["handler"]["type"], "tcp");
        assert!(service["handler"].get("chain").is_none());
        assert_eq!(service["listener"]["type"], "tcp");

        let forwarder = &service["forwarder"];
        assert_eq!(forwarder["nodes"][0]["addr"], "1.2.3.4:80");
        assert_eq!(forwarder["nodes"][1]["addr"], "1.2.3.5:80");
        assert_eq!(forwarder["selector"]["strategy"], "fifo");
        assert_eq!(forwarder["selector"]["maxFails"], 1);
        assert_eq!(forwarder["selector"]["failTimeout"], "600s");
    }

    #[test]
    fn test_udp_service_sets_keepalive() {
        let tunnel = port_forward_tunnel();
        let spec = ServiceSpec {
            name: "5_2_0",
            in_port: 40001,
            limiter: None,
            remote_addr: "1.2.3.4:80",
            tunnel: &tunnel,
            strategy: "",
            interface_name: "",
        };

        let service = build_service(&spec, "udp");
        assert_eq!(service["name"], "5_2_0_udp");
        assert_eq!(service["listener"]["metadata"]["keepAlive"], true);
        // empty strategy falls back to fifo
        assert_eq!(service["forwarder"]["selector"]["strategy"], "fifo");
    }

    #[test]
    fn test_tunneled_service_references_chain() {
        let tunnel = tunneled_tunnel();
        let spec = ServiceSpec {
            name: "7_3_9",
            in_port: 40005,
            limiter: Some(4),
            remote_addr: "10.0.0.1:22",
            tunnel: &tunnel,
            strategy: "round",
            interface_name: "eth1",
        };

        let service = build_service(&spec, "tcp");
        assert_eq!(service["handler"]["chain"], "7_3_9_chains");
        assert!(service.get("forwarder").is_none());
        assert_eq!(service["limiter"], "4");
        assert_eq!(service["metadata"]["interface"], "eth1");
    }

    #[test]
    fn test_listen_addr_prefixes_bind_address() {
        let mut tunnel = port_forward_tunnel();
        tunnel.tcp_listen_addr = "127.0.0.1".to_string();
        let spec = ServiceSpec {
            name: "5_2_0",
            in_port: 40001,
            limiter: None,
            remote_addr: "1.2.3.4:80",
            tunnel: &tunnel,
            strategy: "",
            interface_name: "",
        };
        let service = build_service(&spec, "tcp");
        assert_eq!(service["addr"], "127.0.0.1:40001");
    }

    #[test]
    fn test_remote_service_shape() {
        let spec = RemoteServiceSpec {
            name: "7_3_9",
            out_port: 41000,
            remote_addr: "10.0.0.1:22",
            protocol: "tls",
            strategy: "",
            interface_name: "",
        };

        let service = build_remote_service(&spec);
        assert_eq!(service["name"], "7_3_9_tls");
        assert_eq!(service["addr"], ":41000");
        assert_eq!(service["handler"]["type"], "relay");
        assert_eq!(service["listener"]["type"], "tls");
        assert_eq!(service["forwarder"]["nodes"][0]["addr"], "10.0.0.1:22");
    }

    #[test]
    fn test_chain_shape() {
        let chain = build_chain("7_3_9", "198.51.100.9:41000", "tls", "");
        assert_eq!(chain["name"], "7_3_9_chains");
        let node = &chain["hops"][0]["nodes"][0];
        assert_eq!(node["addr"], "198.51.100.9:41000");
        assert_eq!(node["connector"]["type"], "relay");
        assert_eq!(node["dialer"]["type"], "tls");
        assert!(node["dialer"].get("metadata").is_none());
    }

    #[test]
    fn test_quic_chain_dialer_metadata() {
        let chain = build_chain("7_3_9", "198.51.100.9:41000", "quic", "eth0");
        let node = &chain["hops"][0]["nodes"][0];
        assert_eq!(node["dialer"]["metadata"]["keepAlive"], true);
        assert_eq!(node["dialer"]["metadata"]["ttl"], "10s");
        assert_eq!(node["interface"], "eth0");
    }

    #[test]
    fn test_limiter_shape() {
        let limiter = build_limiter(6, 50);
        assert_eq!(limiter["name"], "6");
        assert_eq!(limiter["limits"][0], "$ 50MB 50MB");
    }

    #[test]
    fn test_forwarder_trims_whitespace() {
        let forwarder = build_forwarder("1.2.3.4:80, 1.2.3.5:80", "random");
        assert_eq!(forwarder["nodes"][1]["addr"], "1.2.3.5:80");
        assert_eq!(forwarder["selector"]["strategy"], "random");
    }
}
