//! User persistence

use super::operations::{parse_uuid, DatabaseManager};
use crate::domain::User;
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, Row};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct UserStats {
    pub total_users: i64,
    pub active_users: i64,
    pub admin_users: i64,
    pub recent_registrations: i64,
    pub recent_logins: i64,
    /// Registrations per day over the last 30 days
    pub registration_rate: f64,
    /// Logins per day over the last 7 days
    pub login_rate: f64,
}

impl DatabaseManager {
    pub async fn create_user(&self, u: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users
            (id, username, email, full_name, hashed_password, salt, role, is_active, last_login,
             login_attempts, locked_until, created_at, updated_at, preferences)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(u.id.to_string())
        .bind(&u.username)
        .bind(&u.email)
        .bind(&u.full_name)
        .bind(&u.hashed_password)
        .bind(&u.salt)
        .bind(u.role.as_str())
        .bind(u.is_active)
        .bind(u.last_login)
        .bind(u.login_attempts)
        .bind(u.locked_until)
        .bind(u.created_at)
        .bind(u.updated_at)
        .bind(serde_json::to_string(&u.preferences)?)
        .execute(&self.pool)
        .await?;

        debug!("Created user {} ({})", u.username, u.id);
        Ok(())
    }

    pub async fn update_user(&self, u: &User) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users SET
                username = ?, email = ?, full_name = ?, hashed_password = ?, salt = ?, role = ?,
                is_active = ?, last_login = ?, login_attempts = ?, locked_until = ?,
                updated_at = ?, preferences = ?
            WHERE id = ?
            "#,
        )
        .bind(&u.username)
        .bind(&u.email)
        .bind(&u.full_name)
        .bind(&u.hashed_password)
        .bind(&u.salt)
        .bind(u.role.as_str())
        .bind(u.is_active)
        .bind(u.last_login)
        .bind(u.login_attempts)
        .bind(u.locked_until)
        .bind(u.updated_at)
        .bind(serde_json::to_string(&u.preferences)?)
        .bind(u.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        self.fetch_user("SELECT * FROM users WHERE id = ?", id.to_string()).await
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.fetch_user("SELECT * FROM users WHERE username = ?", username.to_string())
            .await
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.fetch_user("SELECT * FROM users WHERE email = ?", email.to_lowercase())
            .await
    }

    async fn fetch_user(&self, sql: &str, key: String) -> Result<Option<User>> {
        let row = sqlx::query(sql).bind(key).fetch_optional(&self.pool).await?;
        row.map(row_into_user).transpose()
    }

    pub async fn list_users(&self, skip: i64, limit: i64) -> Result<Vec<User>> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY created_at ASC LIMIT ? OFFSET ?")
            .bind(limit)
            .bind(skip)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_into_user).collect()
    }

    pub async fn delete_user(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_users(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn user_stats(&self) -> Result<UserStats> {
        let now = Utc::now();
        let total_users = self.count_users().await?;
        let active_users = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_active = TRUE")
            .fetch_one(&self.pool)
            .await?;
        let admin_users = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'admin'")
            .fetch_one(&self.pool)
            .await?;
        let recent_registrations: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE created_at >= ?")
                .bind(now - Duration::days(30))
                .fetch_one(&self.pool)
                .await?;
        let recent_logins: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE last_login >= ?")
            .bind(now - Duration::days(7))
            .fetch_one(&self.pool)
            .await?;

        Ok(UserStats {
            total_users,
            active_users,
            admin_users,
            recent_registrations,
            recent_logins,
            registration_rate: recent_registrations as f64 / 30.0,
            login_rate: recent_logins as f64 / 7.0,
        })
    }
}

fn row_into_user(row: SqliteRow) -> Result<User> {
    let preferences: String = row.get("preferences");
    Ok(User {
        id: parse_uuid(row.get("id"))?,
        username: row.get("username"),
        email: row.get("email"),
        full_name: row.get("full_name"),
        hashed_password: row.get("hashed_password"),
        salt: row.get("salt"),
        role: row
            .get::<String, _>("role")
            .parse()
            .map_err(anyhow::Error::msg)?,
        is_active: row.get("is_active"),
        last_login: row.get("last_login"),
        login_attempts: row.get("login_attempts"),
        locked_until: row.get("locked_until"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        preferences: serde_json::from_str(&preferences).context("invalid user preferences")?,
    })
}
