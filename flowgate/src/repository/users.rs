//! User repository

use sqlx::MySqlPool;

use super::now_millis;
use crate::error::Result;
use crate::models::User;

/// Insertable user record; `pwd` is the stored digest, not a plaintext
/// password
#[derive(Debug, Clone)]
pub struct NewUser {
    pub user: String,
    pub pwd: String,
    pub role_id: i32,
    pub exp_time: i64,
    pub flow: i64,
    pub num: i32,
    pub flow_reset_time: i64,
    pub status: i32,
}

#[derive(Clone)]
pub struct UserRepository {
    pool: MySqlPool,
}

impl UserRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM `user` WHERE id = ? AND status != -1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let user =
            sqlx::query_as::<_, User>("SELECT * FROM `user` WHERE user = ? AND status != -1")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;
        Ok(user)
    }

    pub async fn find_all(&self) -> Result<Vec<User>> {
        let users =
            sqlx::query_as::<_, User>("SELECT * FROM `user` WHERE status != -1 ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(users)
    }

    /// Users subject to the monthly reset and expiry sweeps
    pub async fn find_active_regular(&self) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>("SELECT * FROM `user` WHERE role_id != 0 AND status != -1")
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    pub async fn create(&self, u: &NewUser) -> Result<i64> {
        let now = now_millis();
        let result = sqlx::query(
            "INSERT INTO `user` (user, pwd, role_id, exp_time, flow, num, flow_reset_time, status, created_time, updated_time) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&u.user)
        .bind(&u.pwd)
        .bind(u.role_id)
        .bind(u.exp_time)
        .bind(u.flow)
        .bind(u.num)
        .bind(u.flow_reset_time)
        .bind(u.status)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_id() as i64)
    }

    pub async fn update(&self, user: &User) -> Result<()> {
        sqlx::query(
            "UPDATE `user` SET user = ?, pwd = ?, exp_time = ?, flow = ?, num = ?, \
             flow_reset_time = ?, status = ?, updated_time = ? WHERE id = ?",
        )
        .bind(&user.user)
        .bind(&user.pwd)
        .bind(user.exp_time)
        .bind(user.flow)
        .bind(user.num)
        .bind(user.flow_reset_time)
        .bind(user.status)
        .bind(now_millis())
        .bind(user.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_status(&self, id: i64, status: i32) -> Result<()> {
        sqlx::query("UPDATE `user` SET status = ?, updated_time = ? WHERE id = ?")
            .bind(status)
            .bind(now_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Soft delete: the row survives for flow attribution history
    pub async fn soft_delete(&self, id: i64) -> Result<()> {
        self.set_status(id, -1).await
    }

    pub async fn add_flow(&self, id: i64, in_flow: i64, out_flow: i64) -> Result<()> {
        sqlx::query("UPDATE `user` SET in_flow = in_flow + ?, out_flow = out_flow + ? WHERE id = ?")
            .bind(in_flow)
            .bind(out_flow)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn reset_flow(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE `user` SET in_flow = 0, out_flow = 0, updated_time = ? WHERE id = ?")
            .bind(now_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
