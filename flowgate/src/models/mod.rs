//! Persistent entities of the authoritative store
//!
//! One struct per table. Timestamps are Unix milliseconds throughout.

mod forward;
mod node;
mod panel_config;
mod speed_limit;
mod statistics_flow;
mod tunnel;
mod user;
mod user_tunnel;

pub use forward::Forward;
pub use node::Node;
pub use panel_config::PanelConfig;
pub use speed_limit::SpeedLimit;
pub use statistics_flow::StatisticsFlow;
pub use tunnel::Tunnel;
pub use user::User;
pub use user_tunnel::UserTunnel;

/// Quota accounting converts gigabytes to bytes with this factor
pub const BYTES_PER_GB: i64 = 1 << 30;
