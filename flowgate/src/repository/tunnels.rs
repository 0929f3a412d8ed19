//! Tunnel repository

use sqlx::MySqlPool;

use super::now_millis;
use crate::error::Result;
use crate::models::Tunnel;

#[derive(Clone)]
pub struct TunnelRepository {
    pool: MySqlPool,
}

impl TunnelRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Tunnel>> {
        let tunnel = sqlx::query_as::<_, Tunnel>("SELECT * FROM tunnel WHERE id = ? AND status = 0")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tunnel)
    }

    pub async fn find_all(&self) -> Result<Vec<Tunnel>> {
        let tunnels =
            sqlx::query_as::<_, Tunnel>("SELECT * FROM tunnel WHERE status = 0 ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(tunnels)
    }

    pub async fn create(&self, t: &Tunnel) -> Result<i64> {
        let now = now_millis();
        let result = sqlx::query(
            "INSERT INTO tunnel (name, in_node_id, in_ip, out_node_id, out_ip, type, flow, protocol, \
             traffic_ratio, tcp_listen_addr, udp_listen_addr, interface_name, status, created_time, updated_time) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(&t.name)
        .bind(t.in_node_id)
        .bind(&t.in_ip)
        .bind(t.out_node_id)
        .bind(&t.out_ip)
        .bind(t.tunnel_type)
        .bind(t.flow)
        .bind(&t.protocol)
        .bind(t.traffic_ratio)
        .bind(&t.tcp_listen_addr)
        .bind(&t.udp_listen_addr)
        .bind(&t.interface_name)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_id() as i64)
    }

    pub async fn update(&self, t: &Tunnel) -> Result<()> {
        sqlx::query(
            "UPDATE tunnel SET name = ?, in_node_id = ?, in_ip = ?, out_node_id = ?, out_ip = ?, \
             type = ?, flow = ?, protocol = ?, traffic_ratio = ?, tcp_listen_addr = ?, \
             udp_listen_addr = ?, interface_name = ?, updated_time = ? WHERE id = ?",
        )
        .bind(&t.name)
        .bind(t.in_node_id)
        .bind(&t.in_ip)
        .bind(t.out_node_id)
        .bind(&t.out_ip)
        .bind(t.tunnel_type)
        .bind(t.flow)
        .bind(&t.protocol)
        .bind(t.traffic_ratio)
        .bind(&t.tcp_listen_addr)
        .bind(&t.udp_listen_addr)
        .bind(&t.interface_name)
        .bind(now_millis())
        .bind(t.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn soft_delete(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE tunnel SET status = 1, updated_time = ? WHERE id = ?")
            .bind(now_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
