//! Shared application state

use std::sync::Arc;

use sqlx::MySqlPool;

use crate::captcha::CaptchaStore;
use crate::config::Config;
use crate::repository::{
    ConfigRepository, ForwardRepository, NodeRepository, SpeedLimitRepository,
    StatisticsRepository, TunnelRepository, UserRepository, UserTunnelRepository,
};
use crate::service::flow::{FlowLockRegistry, KeyedLocks};
use crate::session::SessionRegistry;

/// Process-wide state handed to every handler and background task.
///
/// Cloning is cheap: the pool and registries are shared handles.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: MySqlPool,
    pub sessions: Arc<SessionRegistry>,
    pub captcha: Arc<CaptchaStore>,
    pub flow_locks: Arc<FlowLockRegistry>,
    /// Serializes port allocation per tunnel
    pub alloc_locks: Arc<KeyedLocks>,
    pub http: reqwest::Client,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config, pool: MySqlPool) -> Self {
        let captcha = Arc::new(CaptchaStore::new(config.captcha.expire_secs));
        Self {
            config: Arc::new(config),
            pool,
            sessions: Arc::new(SessionRegistry::new()),
            captcha,
            flow_locks: Arc::new(FlowLockRegistry::new()),
            alloc_locks: Arc::new(KeyedLocks::new()),
            http: reqwest::Client::new(),
        }
    }

    pub fn users(&self) -> UserRepository {
        UserRepository::new(self.pool.clone())
    }

    pub fn nodes(&self) -> NodeRepository {
        NodeRepository::new(self.pool.clone())
    }

    pub fn tunnels(&self) -> TunnelRepository {
        TunnelRepository::new(self.pool.clone())
    }

    pub fn forwards(&self) -> ForwardRepository {
        ForwardRepository::new(self.pool.clone())
    }

    pub fn user_tunnels(&self) -> UserTunnelRepository {
        UserTunnelRepository::new(self.pool.clone())
    }

    pub fn speed_limits(&self) -> SpeedLimitRepository {
        SpeedLimitRepository::new(self.pool.clone())
    }

    pub fn statistics(&self) -> StatisticsRepository {
        StatisticsRepository::new(self.pool.clone())
    }

    pub fn configs(&self) -> ConfigRepository {
        ConfigRepository::new(self.pool.clone())
    }
}
