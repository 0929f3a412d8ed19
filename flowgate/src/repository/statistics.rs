//! Hourly flow-sample repository

use sqlx::MySqlPool;

use crate::error::Result;
use crate::models::StatisticsFlow;

#[derive(Clone)]
pub struct StatisticsRepository {
    pool: MySqlPool,
}

impl StatisticsRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Most recent sample for a user, if any
    pub async fn latest_for_user(&self, user_id: i64) -> Result<Option<StatisticsFlow>> {
        let sample = sqlx::query_as::<_, StatisticsFlow>(
            "SELECT * FROM statistics_flow WHERE user_id = ? ORDER BY created_time DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sample)
    }

    pub async fn find_by_user(&self, user_id: i64) -> Result<Vec<StatisticsFlow>> {
        let samples = sqlx::query_as::<_, StatisticsFlow>(
            "SELECT * FROM statistics_flow WHERE user_id = ? ORDER BY created_time ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(samples)
    }

    pub async fn insert(&self, user_id: i64, flow: i64, total_flow: i64, time: &str, created_time: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO statistics_flow (user_id, flow, total_flow, time, created_time) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(flow)
        .bind(total_flow)
        .bind(time)
        .bind(created_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Age out samples older than the cutoff (rolling 48 h window)
    pub async fn delete_older_than(&self, cutoff_millis: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM statistics_flow WHERE created_time < ?")
            .bind(cutoff_millis)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
