//! Hourly flow sample

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One point of the per-user dashboard time series.
///
/// `flow` is the increment since the previous sample, `total_flow` the
/// cumulative counter at sampling time, `time` the `HH:mm` label.
/// Samples are aged out after 48 hours.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StatisticsFlow {
    pub id: i64,
    pub user_id: i64,
    pub flow: i64,
    pub total_flow: i64,
    pub time: String,
    pub created_time: i64,
}
