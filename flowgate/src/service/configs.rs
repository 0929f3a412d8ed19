//! Panel configuration service

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::PanelConfig;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UpdateConfigsRequest {
    pub configs: Vec<ConfigEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ConfigEntry {
    pub name: String,
    pub value: String,
}

#[derive(Clone)]
pub struct ConfigService {
    state: AppState,
}

impl ConfigService {
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub async fn list(&self) -> Result<Vec<PanelConfig>> {
        self.state.configs().find_all().await
    }

    pub async fn get(&self, name: &str) -> Result<PanelConfig> {
        self.state
            .configs()
            .find_by_name(name)
            .await?
            .ok_or_else(|| Error::not_found("配置不存在"))
    }

    pub async fn update(&self, req: UpdateConfigsRequest) -> Result<()> {
        for entry in req.configs {
            self.state.configs().upsert(&entry.name, &entry.value).await?;
        }
        Ok(())
    }

    pub async fn update_single(&self, name: &str, value: &str) -> Result<()> {
        self.state.configs().upsert(name, value).await
    }
}
