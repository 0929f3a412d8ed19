//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following
//! precedence (highest to lowest):
//! 1. Well-known environment overrides (`DB_HOST`, `DB_USER`, `DB_PASSWORD`,
//!    `DB_NAME`, `JWT_SECRET`, `LOG_DIR`)
//! 2. Environment variables (prefix: `FLOWGATE_`)
//! 3. Current working directory: ./config.toml
//! 4. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// JWT configuration
    #[serde(default)]
    pub jwt: JwtConfig,

    /// Captcha configuration
    #[serde(default)]
    pub captcha: CaptchaConfig,

    /// Log configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Server-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Run mode (debug, release)
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Maximum concurrent connections accepted by the listener
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Graceful shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host
    #[serde(default = "default_db_host")]
    pub host: String,

    /// Database port
    #[serde(default = "default_db_port")]
    pub port: u16,

    /// Database user
    #[serde(default)]
    pub user: String,

    /// Database password
    #[serde(default)]
    pub password: String,

    /// Database name
    #[serde(default)]
    pub dbname: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_open_conns")]
    pub max_open_conns: u32,

    /// Minimum idle connections
    #[serde(default = "default_max_idle_conns")]
    pub max_idle_conns: u32,

    /// Maximum connection lifetime in seconds
    #[serde(default = "default_conn_max_lifetime")]
    pub conn_max_lifetime_secs: u64,

    /// Maximum retry attempts for establishing the initial connection
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between retry attempts in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

impl DatabaseConfig {
    /// Build the MySQL connection URL
    #[must_use]
    pub fn url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.dbname
        )
    }
}

/// JWT configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// HMAC signing secret (HS256)
    #[serde(default)]
    pub secret: String,

    /// Token lifetime in hours
    #[serde(default = "default_jwt_expire_hours")]
    pub expire_hours: i64,
}

/// Captcha configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaConfig {
    /// Whether captcha verification gates login
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lifetime of a validated captcha token in seconds
    #[serde(default = "default_captcha_expire")]
    pub expire_secs: i64,
}

/// Log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Directory for log files
    #[serde(default = "default_log_dir")]
    pub dir: String,

    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            mode: default_mode(),
            max_connections: default_max_connections(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            user: String::new(),
            password: String::new(),
            dbname: String::new(),
            max_open_conns: default_max_open_conns(),
            max_idle_conns: default_max_idle_conns(),
            conn_max_lifetime_secs: default_conn_max_lifetime(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
        }
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            expire_hours: default_jwt_expire_hours(),
        }
    }
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            expire_secs: default_captcha_expire(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            jwt: JwtConfig::default(),
            captcha: CaptchaConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, `config.toml` and the environment
    pub fn load() -> Result<Self> {
        let mut config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("FLOWGATE_").split("__"))
            .extract()?;

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply the well-known deployment environment overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("DB_HOST") {
            self.database.host = host;
        }
        if let Ok(user) = std::env::var("DB_USER") {
            self.database.user = user;
        }
        if let Ok(password) = std::env::var("DB_PASSWORD") {
            self.database.password = password;
        }
        if let Ok(dbname) = std::env::var("DB_NAME") {
            self.database.dbname = dbname;
        }
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            self.jwt.secret = secret;
        }
        if let Ok(dir) = std::env::var("LOG_DIR") {
            self.log.dir = dir;
        }
    }
}

fn default_port() -> u16 {
    6365
}

fn default_mode() -> String {
    "debug".to_string()
}

fn default_max_connections() -> u32 {
    2000
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    3306
}

fn default_max_open_conns() -> u32 {
    20
}

fn default_max_idle_conns() -> u32 {
    5
}

fn default_conn_max_lifetime() -> u64 {
    500
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    2
}

fn default_jwt_expire_hours() -> i64 {
    2160
}

fn default_true() -> bool {
    true
}

fn default_captcha_expire() -> i64 {
    120
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 6365);
        assert_eq!(config.server.max_connections, 2000);
        assert_eq!(config.server.shutdown_timeout_secs, 30);
        assert_eq!(config.jwt.expire_hours, 2160);
        assert_eq!(config.captcha.expire_secs, 120);
        assert_eq!(config.database.port, 3306);
    }

    #[test]
    fn test_database_url() {
        let db = DatabaseConfig {
            user: "panel".to_string(),
            password: "pw".to_string(),
            host: "db.internal".to_string(),
            port: 3306,
            dbname: "flowgate".to_string(),
            ..DatabaseConfig::default()
        };
        assert_eq!(db.url(), "mysql://panel:pw@db.internal:3306/flowgate");
    }
}
