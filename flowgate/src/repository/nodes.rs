//! Node repository

use sqlx::MySqlPool;

use super::now_millis;
use crate::error::Result;
use crate::models::Node;

/// Insertable node record
#[derive(Debug, Clone)]
pub struct NewNode {
    pub name: String,
    pub secret: String,
    pub ip: String,
    pub server_ip: String,
    pub version: String,
    pub port_sta: i32,
    pub port_end: i32,
    pub http: i32,
    pub tls: i32,
    pub socks: i32,
}

#[derive(Clone)]
pub struct NodeRepository {
    pool: MySqlPool,
}

impl NodeRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Node>> {
        let node = sqlx::query_as::<_, Node>("SELECT * FROM node WHERE id = ? AND deleted = 0")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(node)
    }

    pub async fn find_by_secret(&self, secret: &str) -> Result<Option<Node>> {
        let node = sqlx::query_as::<_, Node>("SELECT * FROM node WHERE secret = ? AND deleted = 0")
            .bind(secret)
            .fetch_optional(&self.pool)
            .await?;
        Ok(node)
    }

    pub async fn find_all(&self) -> Result<Vec<Node>> {
        let nodes = sqlx::query_as::<_, Node>("SELECT * FROM node WHERE deleted = 0 ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(nodes)
    }

    pub async fn create(&self, node: &NewNode) -> Result<i64> {
        let now = now_millis();
        let result = sqlx::query(
            "INSERT INTO node (name, secret, ip, server_ip, version, port_sta, port_end, http, tls, socks, status, created_time, updated_time) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(&node.name)
        .bind(&node.secret)
        .bind(&node.ip)
        .bind(&node.server_ip)
        .bind(&node.version)
        .bind(node.port_sta)
        .bind(node.port_end)
        .bind(node.http)
        .bind(node.tls)
        .bind(node.socks)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_id() as i64)
    }

    pub async fn update(&self, node: &Node) -> Result<()> {
        sqlx::query(
            "UPDATE node SET name = ?, secret = ?, ip = ?, server_ip = ?, version = ?, \
             port_sta = ?, port_end = ?, http = ?, tls = ?, socks = ?, updated_time = ? WHERE id = ?",
        )
        .bind(&node.name)
        .bind(&node.secret)
        .bind(&node.ip)
        .bind(&node.server_ip)
        .bind(&node.version)
        .bind(node.port_sta)
        .bind(node.port_end)
        .bind(node.http)
        .bind(node.tls)
        .bind(node.socks)
        .bind(now_millis())
        .bind(node.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn soft_delete(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE node SET deleted = 1, updated_time = ? WHERE id = ?")
            .bind(now_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Session liveness plus the hints reported on admission
    pub async fn set_online(&self, id: i64, version: &str, http: i32, tls: i32, socks: i32) -> Result<()> {
        sqlx::query(
            "UPDATE node SET status = 1, version = ?, http = ?, tls = ?, socks = ?, updated_time = ? WHERE id = ?",
        )
        .bind(version)
        .bind(http)
        .bind(tls)
        .bind(socks)
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_offline(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE node SET status = 0, updated_time = ? WHERE id = ?")
            .bind(now_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
