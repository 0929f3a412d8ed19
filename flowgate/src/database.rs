//! Database connection pool management and schema bootstrap

use std::time::Duration;

use sqlx::{mysql::MySqlPoolOptions, MySqlPool};

use crate::{config::DatabaseConfig, error::Result};

/// Create a MySQL connection pool with retry logic.
///
/// Uses exponential backoff between attempts so a panel restarted
/// alongside its database comes up cleanly.
pub async fn create_pool(config: &DatabaseConfig) -> Result<MySqlPool> {
    let mut attempt = 0;
    let base_delay = Duration::from_secs(config.retry_delay_secs);

    loop {
        match try_create_pool(config).await {
            Ok(pool) => {
                if attempt > 0 {
                    tracing::info!(
                        "database connection established after {} attempt(s)",
                        attempt + 1
                    );
                } else {
                    tracing::info!(
                        max = config.max_open_conns,
                        min = config.max_idle_conns,
                        "database connection pool created"
                    );
                }
                return Ok(pool);
            }
            Err(e) => {
                attempt += 1;

                if attempt > config.max_retries {
                    tracing::error!(
                        "failed to connect to database after {} attempts: {}",
                        config.max_retries + 1,
                        e
                    );
                    return Err(e);
                }

                let delay = base_delay * 2_u32.pow(attempt.saturating_sub(1));
                tracing::warn!(
                    "database connection attempt {} failed: {}. retrying in {:?}",
                    attempt,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn try_create_pool(config: &DatabaseConfig) -> Result<MySqlPool> {
    let pool = MySqlPoolOptions::new()
        .max_connections(config.max_open_conns)
        .min_connections(config.max_idle_conns)
        .max_lifetime(Duration::from_secs(config.conn_max_lifetime_secs))
        .connect(&config.url())
        .await?;

    Ok(pool)
}

/// Create missing tables and seed the bootstrap rows.
///
/// Idempotent: every statement is `IF NOT EXISTS` or guarded by an
/// existence check, so running it on every startup is safe.
pub async fn init_schema(pool: &MySqlPool) -> Result<()> {
    for ddl in SCHEMA {
        sqlx::query(ddl).execute(pool).await?;
    }

    seed_admin_user(pool).await?;
    seed_default_configs(pool).await?;

    Ok(())
}

const SCHEMA: &[&str] = &[
    r"CREATE TABLE IF NOT EXISTS `user` (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        user VARCHAR(100) NOT NULL UNIQUE,
        pwd VARCHAR(255) NOT NULL,
        role_id INT NOT NULL DEFAULT 1,
        exp_time BIGINT NOT NULL DEFAULT 0,
        flow BIGINT NOT NULL DEFAULT 0,
        in_flow BIGINT NOT NULL DEFAULT 0,
        out_flow BIGINT NOT NULL DEFAULT 0,
        num INT NOT NULL DEFAULT 0,
        flow_reset_time BIGINT NOT NULL DEFAULT 0,
        status INT NOT NULL DEFAULT 1,
        created_time BIGINT NOT NULL DEFAULT 0,
        updated_time BIGINT NOT NULL DEFAULT 0
    )",
    r"CREATE TABLE IF NOT EXISTS node (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        name VARCHAR(100) NOT NULL,
        secret VARCHAR(255) NOT NULL,
        ip VARCHAR(100) NOT NULL DEFAULT '',
        server_ip VARCHAR(100) NOT NULL DEFAULT '',
        version VARCHAR(50) NOT NULL DEFAULT '',
        port_sta INT NOT NULL DEFAULT 0,
        port_end INT NOT NULL DEFAULT 0,
        http INT NOT NULL DEFAULT 0,
        tls INT NOT NULL DEFAULT 0,
        socks INT NOT NULL DEFAULT 0,
        status INT NOT NULL DEFAULT 0,
        deleted INT NOT NULL DEFAULT 0,
        created_time BIGINT NOT NULL DEFAULT 0,
        updated_time BIGINT NOT NULL DEFAULT 0
    )",
    r"CREATE TABLE IF NOT EXISTS tunnel (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        name VARCHAR(100) NOT NULL,
        in_node_id BIGINT NOT NULL,
        in_ip VARCHAR(100) NOT NULL DEFAULT '',
        out_node_id BIGINT NOT NULL DEFAULT 0,
        out_ip VARCHAR(100) NOT NULL DEFAULT '',
        type INT NOT NULL DEFAULT 1,
        flow INT NOT NULL DEFAULT 2,
        protocol VARCHAR(50) NOT NULL DEFAULT 'tls',
        traffic_ratio DOUBLE NOT NULL DEFAULT 1.0,
        tcp_listen_addr VARCHAR(255) NOT NULL DEFAULT '',
        udp_listen_addr VARCHAR(255) NOT NULL DEFAULT '',
        interface_name VARCHAR(100) NOT NULL DEFAULT '',
        status INT NOT NULL DEFAULT 0,
        created_time BIGINT NOT NULL DEFAULT 0,
        updated_time BIGINT NOT NULL DEFAULT 0
    )",
    r"CREATE TABLE IF NOT EXISTS forward (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        user_id BIGINT NOT NULL,
        user_name VARCHAR(100) NOT NULL DEFAULT '',
        name VARCHAR(100) NOT NULL DEFAULT '',
        tunnel_id BIGINT NOT NULL,
        in_port INT NOT NULL DEFAULT 0,
        out_port INT NOT NULL DEFAULT 0,
        remote_addr VARCHAR(255) NOT NULL DEFAULT '',
        interface_name VARCHAR(100) NOT NULL DEFAULT '',
        strategy VARCHAR(50) NOT NULL DEFAULT '',
        in_flow BIGINT NOT NULL DEFAULT 0,
        out_flow BIGINT NOT NULL DEFAULT 0,
        inx INT NOT NULL DEFAULT 0,
        status INT NOT NULL DEFAULT 1,
        created_time BIGINT NOT NULL DEFAULT 0,
        updated_time BIGINT NOT NULL DEFAULT 0
    )",
    r"CREATE TABLE IF NOT EXISTS user_tunnel (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        user_id BIGINT NOT NULL,
        tunnel_id BIGINT NOT NULL,
        exp_time BIGINT NOT NULL DEFAULT 0,
        flow BIGINT NOT NULL DEFAULT 0,
        in_flow BIGINT NOT NULL DEFAULT 0,
        out_flow BIGINT NOT NULL DEFAULT 0,
        flow_reset_time BIGINT NOT NULL DEFAULT 0,
        num INT NOT NULL DEFAULT 0,
        speed_id BIGINT NULL,
        status INT NOT NULL DEFAULT 1,
        created_time BIGINT NOT NULL DEFAULT 0,
        updated_time BIGINT NOT NULL DEFAULT 0,
        UNIQUE KEY idx_user_tunnel (user_id, tunnel_id)
    )",
    r"CREATE TABLE IF NOT EXISTS speed_limit (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        name VARCHAR(100) NOT NULL,
        speed INT NOT NULL DEFAULT 0,
        tunnel_id BIGINT NOT NULL DEFAULT 0,
        tunnel_name VARCHAR(100) NOT NULL DEFAULT '',
        status INT NOT NULL DEFAULT 0,
        created_time BIGINT NOT NULL DEFAULT 0,
        updated_time BIGINT NOT NULL DEFAULT 0
    )",
    r"CREATE TABLE IF NOT EXISTS statistics_flow (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        user_id BIGINT NOT NULL,
        flow BIGINT NOT NULL DEFAULT 0,
        total_flow BIGINT NOT NULL DEFAULT 0,
        time VARCHAR(10) NOT NULL DEFAULT '',
        created_time BIGINT NOT NULL DEFAULT 0,
        KEY idx_user (user_id),
        KEY idx_created (created_time)
    )",
    r"CREATE TABLE IF NOT EXISTS vite_config (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        name VARCHAR(100) NOT NULL UNIQUE,
        value TEXT NOT NULL,
        time BIGINT NOT NULL DEFAULT 0
    )",
];

async fn seed_admin_user(pool: &MySqlPool) -> Result<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM `user` WHERE role_id = 0")
        .fetch_one(pool)
        .await?;

    if count == 0 {
        let now = chrono::Utc::now().timestamp_millis();
        let digest = format!("{:x}", md5::compute("admin_user"));
        sqlx::query(
            "INSERT INTO `user` (user, pwd, role_id, status, created_time, updated_time) \
             VALUES ('admin_user', ?, 0, 1, ?, ?)",
        )
        .bind(digest)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
        tracing::info!("seeded default admin account");
    }

    Ok(())
}

async fn seed_default_configs(pool: &MySqlPool) -> Result<()> {
    let defaults = [
        ("captcha_enabled", "false"),
        ("captcha_type", "turnstile"),
        ("turnstile_site_key", ""),
        ("turnstile_secret_key", ""),
        ("ip", ""),
    ];

    let now = chrono::Utc::now().timestamp_millis();
    for (name, value) in defaults {
        sqlx::query("INSERT IGNORE INTO vite_config (name, value, time) VALUES (?, ?, ?)")
            .bind(name)
            .bind(value)
            .bind(now)
            .execute(pool)
            .await?;
    }

    Ok(())
}
