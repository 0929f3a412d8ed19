//! Forward repository

use sqlx::MySqlPool;

use super::now_millis;
use crate::error::Result;
use crate::models::Forward;

/// Insertable forward record
#[derive(Debug, Clone)]
pub struct NewForward {
    pub user_id: i64,
    pub user_name: String,
    pub name: String,
    pub tunnel_id: i64,
    pub in_port: i32,
    pub out_port: i32,
    pub remote_addr: String,
    pub interface_name: String,
    pub strategy: String,
    pub status: i32,
}

#[derive(Clone)]
pub struct ForwardRepository {
    pool: MySqlPool,
}

impl ForwardRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Forward>> {
        let forward = sqlx::query_as::<_, Forward>("SELECT * FROM forward WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(forward)
    }

    pub async fn exists(&self, id: i64) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM forward WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    pub async fn find_all(&self) -> Result<Vec<Forward>> {
        let forwards = sqlx::query_as::<_, Forward>("SELECT * FROM forward ORDER BY inx ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(forwards)
    }

    pub async fn find_by_user(&self, user_id: i64) -> Result<Vec<Forward>> {
        let forwards =
            sqlx::query_as::<_, Forward>("SELECT * FROM forward WHERE user_id = ? ORDER BY inx ASC")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(forwards)
    }

    pub async fn find_by_user_and_tunnel(&self, user_id: i64, tunnel_id: i64) -> Result<Vec<Forward>> {
        let forwards = sqlx::query_as::<_, Forward>(
            "SELECT * FROM forward WHERE user_id = ? AND tunnel_id = ? ORDER BY inx ASC",
        )
        .bind(user_id)
        .bind(tunnel_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(forwards)
    }

    pub async fn count_by_user(&self, user_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM forward WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_by_user_and_tunnel(&self, user_id: i64, tunnel_id: i64) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM forward WHERE user_id = ? AND tunnel_id = ?")
                .bind(user_id)
                .bind(tunnel_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Ports already occupied on a node, in both of its roles: entry
    /// ports where the node is a tunnel's in-node, and relay ports where
    /// it is the out-node of a tunneled topology.
    pub async fn used_ports(&self, node_id: i64) -> Result<Vec<i32>> {
        let ports: Vec<i32> = sqlx::query_scalar(
            "SELECT f.in_port FROM forward f JOIN tunnel t ON f.tunnel_id = t.id WHERE t.in_node_id = ? \
             UNION \
             SELECT f.out_port FROM forward f JOIN tunnel t ON f.tunnel_id = t.id \
             WHERE t.out_node_id = ? AND t.type = 2",
        )
        .bind(node_id)
        .bind(node_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ports)
    }

    pub async fn create(&self, f: &NewForward) -> Result<i64> {
        let now = now_millis();
        let result = sqlx::query(
            "INSERT INTO forward (user_id, user_name, name, tunnel_id, in_port, out_port, remote_addr, \
             interface_name, strategy, status, created_time, updated_time) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(f.user_id)
        .bind(&f.user_name)
        .bind(&f.name)
        .bind(f.tunnel_id)
        .bind(f.in_port)
        .bind(f.out_port)
        .bind(&f.remote_addr)
        .bind(&f.interface_name)
        .bind(&f.strategy)
        .bind(f.status)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_id() as i64)
    }

    pub async fn update(&self, f: &Forward) -> Result<()> {
        sqlx::query(
            "UPDATE forward SET name = ?, remote_addr = ?, interface_name = ?, strategy = ?, \
             updated_time = ? WHERE id = ?",
        )
        .bind(&f.name)
        .bind(&f.remote_addr)
        .bind(&f.interface_name)
        .bind(&f.strategy)
        .bind(now_millis())
        .bind(f.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_status(&self, id: i64, status: i32) -> Result<()> {
        sqlx::query("UPDATE forward SET status = ?, updated_time = ? WHERE id = ?")
            .bind(status)
            .bind(now_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM forward WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn add_flow(&self, id: i64, in_flow: i64, out_flow: i64) -> Result<()> {
        sqlx::query("UPDATE forward SET in_flow = in_flow + ?, out_flow = out_flow + ? WHERE id = ?")
            .bind(in_flow)
            .bind(out_flow)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_order(&self, id: i64, inx: i32) -> Result<()> {
        sqlx::query("UPDATE forward SET inx = ?, updated_time = ? WHERE id = ?")
            .bind(inx)
            .bind(now_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
