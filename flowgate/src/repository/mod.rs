//! Narrow repositories over the authoritative store
//!
//! Every mutation is a single SQL statement; additive counter updates
//! use `SET col = col + ?` so concurrent reporters never lose updates.

mod configs;
mod forwards;
mod nodes;
mod speed_limits;
mod statistics;
mod tunnels;
mod user_tunnels;
mod users;

pub use configs::ConfigRepository;
pub use forwards::{ForwardRepository, NewForward};
pub use nodes::{NewNode, NodeRepository};
pub use speed_limits::SpeedLimitRepository;
pub use statistics::StatisticsRepository;
pub use tunnels::TunnelRepository;
pub use user_tunnels::UserTunnelRepository;
pub use users::{NewUser, UserRepository};

/// Current wall clock in Unix milliseconds, the store's time base
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
