//! Temporary link persistence

use super::operations::{parse_uuid, DatabaseManager};
use crate::domain::TemporaryFile;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

impl DatabaseManager {
    pub async fn create_temp_file(&self, t: &TemporaryFile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO temporary_files
            (id, download_id, file_path, token, expiration_time, access_count, max_accesses,
             temporary_url, file_hash, custom_filename, created_at, last_accessed)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(t.id.to_string())
        .bind(t.download_id.to_string())
        .bind(&t.file_path)
        .bind(&t.token)
        .bind(t.expiration_time)
        .bind(t.access_count)
        .bind(t.max_accesses)
        .bind(&t.temporary_url)
        .bind(&t.file_hash)
        .bind(&t.custom_filename)
        .bind(t.created_at)
        .bind(t.last_accessed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_temp_file(&self, t: &TemporaryFile) -> Result<()> {
        sqlx::query(
            "UPDATE temporary_files SET expiration_time = ?, access_count = ?, max_accesses = ?,
             custom_filename = ?, last_accessed = ? WHERE id = ?",
        )
        .bind(t.expiration_time)
        .bind(t.access_count)
        .bind(t.max_accesses)
        .bind(&t.custom_filename)
        .bind(t.last_accessed)
        .bind(t.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Count one access if the link is still live and under its limit.
    /// Returns the new access count, or `None` when the row was not updated.
    pub async fn record_temp_file_access(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let row = sqlx::query(
            "UPDATE temporary_files SET access_count = access_count + 1, last_accessed = ?
             WHERE id = ? AND expiration_time > ?
             AND (max_accesses IS NULL OR access_count < max_accesses)
             RETURNING access_count",
        )
        .bind(now)
        .bind(id.to_string())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get::<i64, _>("access_count")))
    }

    pub async fn get_temp_file_by_token(
        &self,
        download_id: Uuid,
        token: &str,
    ) -> Result<Option<TemporaryFile>> {
        let row = sqlx::query("SELECT * FROM temporary_files WHERE download_id = ? AND token = ?")
            .bind(download_id.to_string())
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_into_temp_file).transpose()
    }

    pub async fn get_temp_files_for_download(&self, download_id: Uuid) -> Result<Vec<TemporaryFile>> {
        let rows = sqlx::query("SELECT * FROM temporary_files WHERE download_id = ? ORDER BY created_at DESC")
            .bind(download_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_into_temp_file).collect()
    }

    pub async fn delete_temp_file(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM temporary_files WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_expired_temp_files(&self) -> Result<Vec<TemporaryFile>> {
        let rows = sqlx::query("SELECT * FROM temporary_files WHERE expiration_time < ?")
            .bind(Utc::now())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_into_temp_file).collect()
    }
}

fn row_into_temp_file(row: SqliteRow) -> Result<TemporaryFile> {
    Ok(TemporaryFile {
        id: parse_uuid(row.get("id"))?,
        download_id: parse_uuid(row.get("download_id"))?,
        file_path: row.get("file_path"),
        token: row.get("token"),
        expiration_time: row.get("expiration_time"),
        access_count: row.get("access_count"),
        max_accesses: row.get("max_accesses"),
        temporary_url: row.get("temporary_url"),
        file_hash: row.get("file_hash"),
        custom_filename: row.get("custom_filename"),
        created_at: row.get("created_at"),
        last_accessed: row.get("last_accessed"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::initialize_database;
    use crate::domain::{Download, DownloadQuality};
    use chrono::Duration;

    #[tokio::test]
    async fn test_temp_file_crud_and_expiry() {
        let db = DatabaseManager::new(initialize_database("sqlite::memory:").await.unwrap());
        let d = Download::new("https://example.com/v", DownloadQuality::Best);
        db.create_download(&d).await.unwrap();

        let live = TemporaryFile::new(d.id, "/videos/a.mp4", "live", 1, "http://x/live", "h");
        let mut dead = TemporaryFile::new(d.id, "/videos/a.mp4", "dead", 1, "http://x/dead", "h");
        dead.expiration_time = Utc::now() - Duration::minutes(5);
        db.create_temp_file(&live).await.unwrap();
        db.create_temp_file(&dead).await.unwrap();

        let mut loaded = db.get_temp_file_by_token(d.id, "live").await.unwrap().unwrap();
        loaded.increment_access().unwrap();
        db.update_temp_file(&loaded).await.unwrap();
        let loaded = db.get_temp_file_by_token(d.id, "live").await.unwrap().unwrap();
        assert_eq!(loaded.access_count, 1);

        assert!(db.get_temp_file_by_token(Uuid::new_v4(), "live").await.unwrap().is_none());
        assert_eq!(db.get_temp_files_for_download(d.id).await.unwrap().len(), 2);

        let expired = db.get_expired_temp_files().await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].token, "dead");

        // Cascades from the parent download
        db.delete_download(d.id).await.unwrap();
        assert!(db.get_temp_files_for_download(d.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_access_stops_at_limit_and_expiry() {
        let db = DatabaseManager::new(initialize_database("sqlite::memory:").await.unwrap());
        let d = Download::new("https://example.com/v", DownloadQuality::Best);
        db.create_download(&d).await.unwrap();

        let mut capped = TemporaryFile::new(d.id, "/videos/a.mp4", "capped", 1, "http://x/c", "h");
        capped.max_accesses = Some(2);
        let mut dead = TemporaryFile::new(d.id, "/videos/a.mp4", "dead", 1, "http://x/d", "h");
        dead.expiration_time = Utc::now() - Duration::minutes(5);
        db.create_temp_file(&capped).await.unwrap();
        db.create_temp_file(&dead).await.unwrap();

        let now = Utc::now();
        assert_eq!(db.record_temp_file_access(capped.id, now).await.unwrap(), Some(1));
        assert_eq!(db.record_temp_file_access(capped.id, now).await.unwrap(), Some(2));
        assert_eq!(db.record_temp_file_access(capped.id, now).await.unwrap(), None);
        assert_eq!(db.record_temp_file_access(dead.id, now).await.unwrap(), None);

        let loaded = db.get_temp_file_by_token(d.id, "capped").await.unwrap().unwrap();
        assert_eq!(loaded.access_count, 2);
        assert!(loaded.last_accessed.is_some());
    }
}
