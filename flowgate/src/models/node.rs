//! Agent endpoint

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An agent endpoint under the control plane's authority.
///
/// `secret` is the sole bearer credential for the agent's session and
/// HTTP uploads. `status` tracks session liveness (ONLINE/OFFLINE);
/// `deleted` is the soft-delete flag.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Node {
    pub id: i64,
    pub name: String,
    pub secret: String,
    pub ip: String,
    pub server_ip: String,
    pub version: String,
    pub port_sta: i32,
    pub port_end: i32,
    pub http: i32,
    pub tls: i32,
    pub socks: i32,
    pub status: i32,
    pub deleted: i32,
    pub created_time: i64,
    pub updated_time: i64,
}

impl Node {
    /// No live session
    pub const STATUS_OFFLINE: i32 = 0;
    /// Live session present
    pub const STATUS_ONLINE: i32 = 1;
}
