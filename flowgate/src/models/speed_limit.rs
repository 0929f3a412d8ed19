//! Named rate-limit rule

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A named rate limit pushed to agents as a limiter; `speed` is in
/// megabytes per second.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SpeedLimit {
    pub id: i64,
    pub name: String,
    pub speed: i32,
    #[serde(rename = "tunnelId")]
    pub tunnel_id: i64,
    #[serde(rename = "tunnelName")]
    pub tunnel_name: String,
    pub status: i32,
    pub created_time: i64,
    pub updated_time: i64,
}
