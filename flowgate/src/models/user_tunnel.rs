//! User-tunnel grant

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Binds a user to a tunnel with its own quota and expiry.
///
/// `(user_id, tunnel_id)` is unique. `num` caps the number of forwards
/// the user may create on the tunnel; `speed_id` optionally references
/// a [`super::SpeedLimit`] applied to every forward under the grant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserTunnel {
    pub id: i64,
    pub user_id: i64,
    pub tunnel_id: i64,
    pub exp_time: i64,
    pub flow: i64,
    pub in_flow: i64,
    pub out_flow: i64,
    pub flow_reset_time: i64,
    pub num: i32,
    pub speed_id: Option<i64>,
    pub status: i32,
    pub created_time: i64,
    pub updated_time: i64,
}

impl UserTunnel {
    pub const STATUS_DISABLED: i32 = 0;
    pub const STATUS_ENABLED: i32 = 1;
}
