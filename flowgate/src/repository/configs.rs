//! Panel configuration repository

use sqlx::MySqlPool;

use super::now_millis;
use crate::error::Result;
use crate::models::PanelConfig;

#[derive(Clone)]
pub struct ConfigRepository {
    pool: MySqlPool,
}

impl ConfigRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<PanelConfig>> {
        let config = sqlx::query_as::<_, PanelConfig>("SELECT * FROM vite_config WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(config)
    }

    pub async fn find_all(&self) -> Result<Vec<PanelConfig>> {
        let configs = sqlx::query_as::<_, PanelConfig>("SELECT * FROM vite_config ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(configs)
    }

    /// Insert or replace one knob
    pub async fn upsert(&self, name: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO vite_config (name, value, time) VALUES (?, ?, ?) \
             ON DUPLICATE KEY UPDATE value = VALUES(value), time = VALUES(time)",
        )
        .bind(name)
        .bind(value)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Value of a knob, or the provided default when unset
    pub async fn value_or(&self, name: &str, default: &str) -> Result<String> {
        Ok(self
            .find_by_name(name)
            .await?
            .map(|c| c.value)
            .unwrap_or_else(|| default.to_string()))
    }
}
