//! Key-value panel configuration

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Operator-tunable knob stored in the `vite_config` table
/// (captcha settings, panel public address, ...).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PanelConfig {
    pub id: i64,
    pub name: String,
    pub value: String,
    pub time: i64,
}
