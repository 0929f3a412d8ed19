//! User forwarding rule

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A user's concrete forwarding rule on top of a tunnel.
///
/// `remote_addr` is a comma-separated `host:port` list; `inx` is the
/// operator-defined display order.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Forward {
    pub id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub name: String,
    pub tunnel_id: i64,
    pub in_port: i32,
    pub out_port: i32,
    pub remote_addr: String,
    pub interface_name: String,
    pub strategy: String,
    pub in_flow: i64,
    pub out_flow: i64,
    pub inx: i32,
    pub status: i32,
    pub created_time: i64,
    pub updated_time: i64,
}

impl Forward {
    /// Suspended; listeners paused on the agents
    pub const STATUS_PAUSED: i32 = 0;
    /// Live on the agents
    pub const STATUS_ACTIVE: i32 = 1;
}
