//! Panel account

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A panel account.
///
/// `flow` is the total quota in gigabytes; `in_flow`/`out_flow` are the
/// monotonic byte counters since the last reset. `flow_reset_time` holds
/// the day of month (1..=31) on which the counters reset, `0` disables
/// the reset.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub user: String,
    #[serde(skip_serializing)]
    pub pwd: String,
    pub role_id: i32,
    pub exp_time: i64,
    pub flow: i64,
    pub in_flow: i64,
    pub out_flow: i64,
    pub num: i32,
    pub flow_reset_time: i64,
    pub status: i32,
    pub created_time: i64,
    pub updated_time: i64,
}

impl User {
    /// Administrator role id
    pub const ROLE_ADMIN: i32 = 0;
    /// Regular-user role id
    pub const ROLE_REGULAR: i32 = 1;

    /// Soft-deleted account
    pub const STATUS_DELETED: i32 = -1;
    /// Disabled account
    pub const STATUS_DISABLED: i32 = 0;
    /// Enabled account
    pub const STATUS_ENABLED: i32 = 1;

    /// Whether this account has the administrator role
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role_id == Self::ROLE_ADMIN
    }
}
