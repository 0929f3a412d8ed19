//! User-tunnel grant repository

use sqlx::MySqlPool;

use super::now_millis;
use crate::error::Result;
use crate::models::UserTunnel;

#[derive(Clone)]
pub struct UserTunnelRepository {
    pool: MySqlPool,
}

impl UserTunnelRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<UserTunnel>> {
        let grant = sqlx::query_as::<_, UserTunnel>("SELECT * FROM user_tunnel WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(grant)
    }

    pub async fn find_by_user_and_tunnel(&self, user_id: i64, tunnel_id: i64) -> Result<Option<UserTunnel>> {
        let grant = sqlx::query_as::<_, UserTunnel>(
            "SELECT * FROM user_tunnel WHERE user_id = ? AND tunnel_id = ?",
        )
        .bind(user_id)
        .bind(tunnel_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(grant)
    }

    pub async fn find_by_user(&self, user_id: i64) -> Result<Vec<UserTunnel>> {
        let grants = sqlx::query_as::<_, UserTunnel>(
            "SELECT * FROM user_tunnel WHERE user_id = ? ORDER BY id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(grants)
    }

    pub async fn find_by_tunnel(&self, tunnel_id: i64) -> Result<Vec<UserTunnel>> {
        let grants = sqlx::query_as::<_, UserTunnel>(
            "SELECT * FROM user_tunnel WHERE tunnel_id = ? ORDER BY id ASC",
        )
        .bind(tunnel_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(grants)
    }

    pub async fn find_all(&self) -> Result<Vec<UserTunnel>> {
        let grants = sqlx::query_as::<_, UserTunnel>("SELECT * FROM user_tunnel ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(grants)
    }

    pub async fn create(&self, g: &UserTunnel) -> Result<i64> {
        let now = now_millis();
        let result = sqlx::query(
            "INSERT INTO user_tunnel (user_id, tunnel_id, exp_time, flow, flow_reset_time, num, speed_id, status, created_time, updated_time) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(g.user_id)
        .bind(g.tunnel_id)
        .bind(g.exp_time)
        .bind(g.flow)
        .bind(g.flow_reset_time)
        .bind(g.num)
        .bind(g.speed_id)
        .bind(g.status)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_id() as i64)
    }

    pub async fn update(&self, g: &UserTunnel) -> Result<()> {
        sqlx::query(
            "UPDATE user_tunnel SET exp_time = ?, flow = ?, flow_reset_time = ?, num = ?, \
             speed_id = ?, status = ?, updated_time = ? WHERE id = ?",
        )
        .bind(g.exp_time)
        .bind(g.flow)
        .bind(g.flow_reset_time)
        .bind(g.num)
        .bind(g.speed_id)
        .bind(g.status)
        .bind(now_millis())
        .bind(g.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_status(&self, id: i64, status: i32) -> Result<()> {
        sqlx::query("UPDATE user_tunnel SET status = ?, updated_time = ? WHERE id = ?")
            .bind(status)
            .bind(now_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM user_tunnel WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn add_flow(&self, id: i64, in_flow: i64, out_flow: i64) -> Result<()> {
        sqlx::query(
            "UPDATE user_tunnel SET in_flow = in_flow + ?, out_flow = out_flow + ? WHERE id = ?",
        )
        .bind(in_flow)
        .bind(out_flow)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn reset_flow(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE user_tunnel SET in_flow = 0, out_flow = 0, updated_time = ? WHERE id = ?")
            .bind(now_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
