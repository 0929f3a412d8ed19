//! Forwarding topology

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A named topology of one (port-forward) or two (tunneled) nodes.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tunnel {
    pub id: i64,
    pub name: String,
    pub in_node_id: i64,
    pub in_ip: String,
    pub out_node_id: i64,
    pub out_ip: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub tunnel_type: i32,
    /// Accounting multiplier: 1 counts uploads only, 2 counts both directions
    pub flow: i32,
    /// Relay dialer type for the chain hop (tcp, tls, quic, ...)
    pub protocol: String,
    pub traffic_ratio: f64,
    pub tcp_listen_addr: String,
    pub udp_listen_addr: String,
    pub interface_name: String,
    pub status: i32,
    pub created_time: i64,
    pub updated_time: i64,
}

impl Tunnel {
    /// Direct port forward terminated on the in-node
    pub const TYPE_PORT_FORWARD: i32 = 1;
    /// Relay through an out-node
    pub const TYPE_TUNNELED: i32 = 2;

    /// Whether the topology relays through an out-node
    #[must_use]
    pub fn is_tunneled(&self) -> bool {
        self.tunnel_type == Self::TYPE_TUNNELED
    }
}
