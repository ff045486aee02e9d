//! Relay configuration persistence

use super::operations::{parse_uuid, DatabaseManager};
use crate::domain::GoogleDriveConfig;
use anyhow::{Context, Result};
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

impl DatabaseManager {
    pub async fn create_drive_config(&self, c: &GoogleDriveConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO drive_configs
            (id, user_id, credentials, folder_id, custom_key, status, created_at, updated_at,
             last_sync, error_message, quota_used, quota_limit, is_default)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(c.id.to_string())
        .bind(c.user_id.to_string())
        .bind(serde_json::to_string(&c.credentials)?)
        .bind(&c.folder_id)
        .bind(&c.custom_key)
        .bind(c.status.as_str())
        .bind(c.created_at)
        .bind(c.updated_at)
        .bind(c.last_sync)
        .bind(&c.error_message)
        .bind(c.quota_used)
        .bind(c.quota_limit)
        .bind(c.is_default)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_drive_config(&self, c: &GoogleDriveConfig) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE drive_configs SET
                credentials = ?, folder_id = ?, custom_key = ?, status = ?, updated_at = ?,
                last_sync = ?, error_message = ?, quota_used = ?, quota_limit = ?, is_default = ?
            WHERE id = ?
            "#,
        )
        .bind(serde_json::to_string(&c.credentials)?)
        .bind(&c.folder_id)
        .bind(&c.custom_key)
        .bind(c.status.as_str())
        .bind(c.updated_at)
        .bind(c.last_sync)
        .bind(&c.error_message)
        .bind(c.quota_used)
        .bind(c.quota_limit)
        .bind(c.is_default)
        .bind(c.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_drive_config(&self, id: Uuid) -> Result<Option<GoogleDriveConfig>> {
        let row = sqlx::query("SELECT * FROM drive_configs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_into_drive_config).transpose()
    }

    /// The user's default config, falling back to their oldest one
    pub async fn get_drive_config_for_user(&self, user_id: Uuid) -> Result<Option<GoogleDriveConfig>> {
        let row = sqlx::query(
            "SELECT * FROM drive_configs WHERE user_id = ? ORDER BY is_default DESC, created_at ASC LIMIT 1",
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_into_drive_config).transpose()
    }

    pub async fn get_default_drive_config(&self) -> Result<Option<GoogleDriveConfig>> {
        let row = sqlx::query(
            "SELECT * FROM drive_configs WHERE is_default = TRUE ORDER BY created_at ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_into_drive_config).transpose()
    }

    pub async fn list_drive_configs(&self, skip: i64, limit: i64) -> Result<Vec<GoogleDriveConfig>> {
        let rows = sqlx::query("SELECT * FROM drive_configs ORDER BY created_at ASC LIMIT ? OFFSET ?")
            .bind(limit)
            .bind(skip)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_into_drive_config).collect()
    }

    pub async fn delete_drive_config(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM drive_configs WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_into_drive_config(row: SqliteRow) -> Result<GoogleDriveConfig> {
    let credentials: String = row.get("credentials");
    Ok(GoogleDriveConfig {
        id: parse_uuid(row.get("id"))?,
        user_id: parse_uuid(row.get("user_id"))?,
        credentials: serde_json::from_str(&credentials).context("invalid drive credentials")?,
        folder_id: row.get("folder_id"),
        custom_key: row.get("custom_key"),
        status: row
            .get::<String, _>("status")
            .parse()
            .map_err(anyhow::Error::msg)?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_sync: row.get("last_sync"),
        error_message: row.get("error_message"),
        quota_used: row.get("quota_used"),
        quota_limit: row.get("quota_limit"),
        is_default: row.get("is_default"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::initialize_database;
    use crate::domain::{DriveStatus, User};
    use serde_json::json;

    #[tokio::test]
    async fn test_drive_config_lookup() {
        let db = DatabaseManager::new(initialize_database("sqlite::memory:").await.unwrap());
        let user = User::new("alice", "alice@example.com", "h", "s");
        db.create_user(&user).await.unwrap();

        assert!(db.get_default_drive_config().await.unwrap().is_none());

        let mut config = GoogleDriveConfig::new(user.id, json!({"access_token": "abc"}));
        config.is_default = true;
        config.folder_id = Some("videos".into());
        db.create_drive_config(&config).await.unwrap();

        let loaded = db.get_drive_config_for_user(user.id).await.unwrap().unwrap();
        assert_eq!(loaded.access_token(), Some("abc"));
        assert_eq!(db.get_default_drive_config().await.unwrap().unwrap().id, config.id);

        config.mark_error("quota exceeded");
        db.update_drive_config(&config).await.unwrap();
        let loaded = db.get_drive_config(config.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DriveStatus::Error);

        assert_eq!(db.list_drive_configs(0, 10).await.unwrap().len(), 1);
        assert!(db.delete_drive_config(config.id).await.unwrap());
        assert!(db.get_drive_config(config.id).await.unwrap().is_none());
    }
}
