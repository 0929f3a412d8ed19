//! Speed-limit management
//!
//! Limit rows map one-to-one onto agent limiters named by the row id.
//! Mutations are pushed to the tunnel's in-node (and out-node for
//! tunneled topologies) best-effort; the orphan GC removes limiters
//! whose row is gone.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::gost::Gost;
use crate::models::{SpeedLimit, Tunnel};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSpeedLimitRequest {
    pub name: String,
    pub speed: i32,
    #[serde(rename = "tunnelId")]
    pub tunnel_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSpeedLimitRequest {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub speed: Option<i32>,
}

#[derive(Clone)]
pub struct SpeedLimitService {
    state: AppState,
    gost: Gost,
}

impl SpeedLimitService {
    #[must_use]
    pub fn new(state: AppState) -> Self {
        let gost = Gost::new(state.sessions.clone());
        Self { state, gost }
    }

    pub async fn create(&self, req: CreateSpeedLimitRequest) -> Result<i64> {
        if req.speed <= 0 {
            return Err(Error::bad_request("限速值无效"));
        }
        let tunnel = self
            .state
            .tunnels()
            .find_by_id(req.tunnel_id)
            .await?
            .ok_or_else(|| Error::not_found("隧道不存在"))?;

        let id = self
            .state
            .speed_limits()
            .create(&req.name, req.speed, tunnel.id, &tunnel.name)
            .await?;

        self.push_limiters(&tunnel, id, req.speed, LimiterOp::Add).await;
        Ok(id)
    }

    pub async fn list(&self) -> Result<Vec<SpeedLimit>> {
        self.state.speed_limits().find_all().await
    }

    /// Tunnels offered by the speed-limit picker
    pub async fn tunnels(&self) -> Result<Vec<Tunnel>> {
        self.state.tunnels().find_all().await
    }

    pub async fn update(&self, req: UpdateSpeedLimitRequest) -> Result<()> {
        let mut limit = self
            .state
            .speed_limits()
            .find_by_id(req.id)
            .await?
            .ok_or_else(|| Error::not_found("限速规则不存在"))?;

        if let Some(name) = req.name {
            limit.name = name;
        }
        if let Some(speed) = req.speed {
            if speed <= 0 {
                return Err(Error::bad_request("限速值无效"));
            }
            limit.speed = speed;
        }

        self.state.speed_limits().update(&limit).await?;

        if let Some(tunnel) = self.state.tunnels().find_by_id(limit.tunnel_id).await? {
            self.push_limiters(&tunnel, limit.id, limit.speed, LimiterOp::Update).await;
        }
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        let limit = self
            .state
            .speed_limits()
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::not_found("限速规则不存在"))?;

        self.state.speed_limits().soft_delete(id).await?;

        if let Some(tunnel) = self.state.tunnels().find_by_id(limit.tunnel_id).await? {
            self.push_limiters(&tunnel, id, 0, LimiterOp::Delete).await;
        }
        Ok(())
    }

    async fn push_limiters(&self, tunnel: &Tunnel, id: i64, speed: i32, op: LimiterOp) {
        let mut node_ids = vec![tunnel.in_node_id];
        if tunnel.is_tunneled() {
            node_ids.push(tunnel.out_node_id);
        }

        for node_id in node_ids {
            let outcome = match op {
                LimiterOp::Add => self.gost.add_limiter(node_id, id, speed).await,
                LimiterOp::Update => self.gost.update_limiter(node_id, id, speed).await,
                LimiterOp::Delete => self.gost.delete_limiter(node_id, id).await,
            };
            if !outcome.success {
                tracing::warn!(node_id, limiter = id, message = %outcome.message, "limiter push failed");
            }
        }
    }
}

#[derive(Clone, Copy)]
enum LimiterOp {
    Add,
    Update,
    Delete,
}
