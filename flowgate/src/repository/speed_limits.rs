//! Speed-limit repository

use sqlx::MySqlPool;

use super::now_millis;
use crate::error::Result;
use crate::models::SpeedLimit;

#[derive(Clone)]
pub struct SpeedLimitRepository {
    pool: MySqlPool,
}

impl SpeedLimitRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<SpeedLimit>> {
        let limit =
            sqlx::query_as::<_, SpeedLimit>("SELECT * FROM speed_limit WHERE id = ? AND status = 0")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(limit)
    }

    pub async fn find_all(&self) -> Result<Vec<SpeedLimit>> {
        let limits = sqlx::query_as::<_, SpeedLimit>(
            "SELECT * FROM speed_limit WHERE status = 0 ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(limits)
    }

    pub async fn exists(&self, id: i64) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM speed_limit WHERE id = ? AND status = 0")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    pub async fn create(&self, name: &str, speed: i32, tunnel_id: i64, tunnel_name: &str) -> Result<i64> {
        let now = now_millis();
        let result = sqlx::query(
            "INSERT INTO speed_limit (name, speed, tunnel_id, tunnel_name, status, created_time, updated_time) \
             VALUES (?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(name)
        .bind(speed)
        .bind(tunnel_id)
        .bind(tunnel_name)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_id() as i64)
    }

    pub async fn update(&self, limit: &SpeedLimit) -> Result<()> {
        sqlx::query(
            "UPDATE speed_limit SET name = ?, speed = ?, tunnel_id = ?, tunnel_name = ?, updated_time = ? WHERE id = ?",
        )
        .bind(&limit.name)
        .bind(limit.speed)
        .bind(limit.tunnel_id)
        .bind(&limit.tunnel_name)
        .bind(now_millis())
        .bind(limit.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn soft_delete(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE speed_limit SET status = 1, updated_time = ? WHERE id = ?")
            .bind(now_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
