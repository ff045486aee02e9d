//! Database CRUD operations for downloads and settings

use crate::domain::{Download, DownloadStatus, StorageType};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};
use tracing::debug;
use uuid::Uuid;

/// Database manager
#[derive(Clone)]
pub struct DatabaseManager {
    pub(super) pool: Pool<Sqlite>,
}

/// Aggregate download counters
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DownloadStats {
    pub total: i64,
    pub pending: i64,
    pub downloading: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub today: i64,
    pub this_week: i64,
    pub this_month: i64,
    pub total_storage_bytes: i64,
    pub average_download_time_secs: f64,
    pub success_rate: f64,
}

/// One page of downloads plus the unpaged total
#[derive(Debug, Clone)]
pub struct DownloadPage {
    pub downloads: Vec<Download>,
    pub total: i64,
}

impl DatabaseManager {
    /// Create new database manager
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Insert a new download row
    pub async fn create_download(&self, d: &Download) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO downloads
            (id, user_id, url, title, description, duration, thumbnail, quality, status, progress,
             file_path, file_size, format, created_at, started_at, completed_at, attempts,
             error_message, downloads_count, last_accessed, uploaded_to_drive, drive_file_id,
             storage_type)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(d.id.to_string())
        .bind(d.user_id.map(|u| u.to_string()))
        .bind(&d.url)
        .bind(&d.title)
        .bind(&d.description)
        .bind(d.duration)
        .bind(&d.thumbnail)
        .bind(d.quality.as_str())
        .bind(d.status.as_str())
        .bind(d.progress)
        .bind(&d.file_path)
        .bind(d.file_size)
        .bind(&d.format)
        .bind(d.created_at)
        .bind(d.started_at)
        .bind(d.completed_at)
        .bind(d.attempts)
        .bind(&d.error_message)
        .bind(d.downloads_count)
        .bind(d.last_accessed)
        .bind(d.uploaded_to_drive)
        .bind(&d.drive_file_id)
        .bind(d.storage_type.as_str())
        .execute(&self.pool)
        .await?;

        debug!("Saved download record: {}", d.id);
        Ok(())
    }

    /// Persist every mutable column of an existing download
    pub async fn update_download(&self, d: &Download) -> Result<()> {
        self.write_download(d, "").await?;
        debug!("Updated download {} ({})", d.id, d.status);
        Ok(())
    }

    /// Like `update_download`, but leaves a row that was cancelled meanwhile
    /// untouched. Returns false in that case.
    pub async fn update_download_unless_cancelled(&self, d: &Download) -> Result<bool> {
        let written = self.write_download(d, " AND status != 'cancelled'").await? > 0;
        if written {
            debug!("Updated download {} ({})", d.id, d.status);
        }
        Ok(written)
    }

    async fn write_download(&self, d: &Download, guard: &str) -> Result<u64> {
        let sql = format!(
            "UPDATE downloads SET
                user_id = ?, url = ?, title = ?, description = ?, duration = ?, thumbnail = ?,
                quality = ?, status = ?, progress = ?, file_path = ?, file_size = ?, format = ?,
                started_at = ?, completed_at = ?, attempts = ?, error_message = ?,
                downloads_count = ?, last_accessed = ?, uploaded_to_drive = ?, drive_file_id = ?,
                storage_type = ?
            WHERE id = ?{}",
            guard
        );
        let result = sqlx::query(&sql)
            .bind(d.user_id.map(|u| u.to_string()))
            .bind(&d.url)
            .bind(&d.title)
            .bind(&d.description)
            .bind(d.duration)
            .bind(&d.thumbnail)
            .bind(d.quality.as_str())
            .bind(d.status.as_str())
            .bind(d.progress)
            .bind(&d.file_path)
            .bind(d.file_size)
            .bind(&d.format)
            .bind(d.started_at)
            .bind(d.completed_at)
            .bind(d.attempts)
            .bind(&d.error_message)
            .bind(d.downloads_count)
            .bind(d.last_accessed)
            .bind(d.uploaded_to_drive)
            .bind(&d.drive_file_id)
            .bind(d.storage_type.as_str())
            .bind(d.id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Get download record by ID
    pub async fn get_download(&self, id: Uuid) -> Result<Option<Download>> {
        let row = sqlx::query("SELECT * FROM downloads WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_into_download).transpose()
    }

    /// Most recent download for a URL
    pub async fn get_download_by_url(&self, url: &str) -> Result<Option<Download>> {
        let row = sqlx::query("SELECT * FROM downloads WHERE url = ? ORDER BY created_at DESC LIMIT 1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_into_download).transpose()
    }

    /// Newest first, optionally filtered by status
    pub async fn list_downloads(
        &self,
        status: Option<DownloadStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<DownloadPage> {
        let (rows, total) = match status {
            Some(status) => {
                let rows = sqlx::query(
                    "SELECT * FROM downloads WHERE status = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
                )
                .bind(status.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;
                let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM downloads WHERE status = ?")
                    .bind(status.as_str())
                    .fetch_one(&self.pool)
                    .await?;
                (rows, total)
            }
            None => {
                let rows = sqlx::query("SELECT * FROM downloads ORDER BY created_at DESC LIMIT ? OFFSET ?")
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?;
                let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM downloads")
                    .fetch_one(&self.pool)
                    .await?;
                (rows, total)
            }
        };

        Ok(DownloadPage {
            downloads: rows_into_downloads(rows)?,
            total,
        })
    }

    /// Oldest pending downloads first
    pub async fn get_pending_downloads(&self, limit: i64) -> Result<Vec<Download>> {
        let rows = sqlx::query("SELECT * FROM downloads WHERE status = 'pending' ORDER BY created_at ASC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows_into_downloads(rows)
    }

    /// Get downloads by status
    pub async fn get_downloads_by_status(&self, status: DownloadStatus) -> Result<Vec<Download>> {
        let rows = sqlx::query("SELECT * FROM downloads WHERE status = ? ORDER BY created_at DESC")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows_into_downloads(rows)
    }

    /// Delete a download. Returns false when no row matched.
    pub async fn delete_download(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM downloads WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        debug!("Deleted download record: {}", id);
        Ok(result.rows_affected() > 0)
    }

    pub async fn download_stats(&self) -> Result<DownloadStats> {
        let mut stats = DownloadStats::default();

        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM downloads GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            let n: i64 = row.get("n");
            stats.total += n;
            match row.get::<String, _>("status").parse::<DownloadStatus>() {
                Ok(DownloadStatus::Pending) => stats.pending = n,
                Ok(DownloadStatus::Downloading) => stats.downloading = n,
                Ok(DownloadStatus::Completed) => stats.completed = n,
                Ok(DownloadStatus::Failed) => stats.failed = n,
                Ok(DownloadStatus::Cancelled) => stats.cancelled = n,
                _ => {}
            }
        }

        let now = Utc::now();
        stats.today = self.count_created_since(now - Duration::days(1)).await?;
        stats.this_week = self.count_created_since(now - Duration::days(7)).await?;
        stats.this_month = self.count_created_since(now - Duration::days(30)).await?;

        stats.total_storage_bytes =
            sqlx::query_scalar("SELECT COALESCE(SUM(file_size), 0) FROM downloads WHERE status = 'completed'")
                .fetch_one(&self.pool)
                .await?;

        let spans = sqlx::query(
            "SELECT started_at, completed_at FROM downloads
             WHERE status = 'completed' AND started_at IS NOT NULL AND completed_at IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        let durations: Vec<f64> = spans
            .iter()
            .map(|row| {
                let start: DateTime<Utc> = row.get("started_at");
                let end: DateTime<Utc> = row.get("completed_at");
                (end - start).num_milliseconds() as f64 / 1000.0
            })
            .collect();
        if !durations.is_empty() {
            stats.average_download_time_secs = durations.iter().sum::<f64>() / durations.len() as f64;
        }

        if stats.total > 0 {
            stats.success_rate = stats.completed as f64 / stats.total as f64 * 100.0;
        }

        Ok(stats)
    }

    async fn count_created_since(&self, since: DateTime<Utc>) -> Result<i64> {
        let n = sqlx::query_scalar("SELECT COUNT(*) FROM downloads WHERE created_at >= ?")
            .bind(since)
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// `(created, failed)` counts for downloads created since `since`
    pub async fn download_outcomes_since(&self, since: DateTime<Utc>) -> Result<(i64, i64)> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS created,
                    COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed
             FROM downloads WHERE created_at >= ?",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok((row.get("created"), row.get("failed")))
    }

    pub async fn failed_downloads_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Download>> {
        let rows = sqlx::query("SELECT * FROM downloads WHERE status = 'failed' AND created_at < ?")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

        rows_into_downloads(rows)
    }

    pub async fn temporary_downloads_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Download>> {
        let rows = sqlx::query(
            "SELECT * FROM downloads WHERE storage_type = ? AND status NOT IN ('pending', 'downloading')
             AND created_at < ?",
        )
        .bind(StorageType::Temporary.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows_into_downloads(rows)
    }

    /// Every file path referenced by a download or temporary link
    pub async fn registered_file_paths(&self) -> Result<Vec<String>> {
        let paths = sqlx::query_scalar(
            "SELECT file_path FROM downloads WHERE file_path IS NOT NULL
             UNION SELECT file_path FROM temporary_files",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(paths)
    }

    /// Save setting
    pub async fn save_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;

        debug!("Saved setting: {} = {}", key, value);
        Ok(())
    }

    /// Get setting
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get("value")))
    }
}

pub(super) fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("invalid uuid in database: {}", raw))
}

pub(super) fn parse_opt_uuid(raw: Option<String>) -> Result<Option<Uuid>> {
    raw.as_deref().map(parse_uuid).transpose()
}

fn rows_into_downloads(rows: Vec<SqliteRow>) -> Result<Vec<Download>> {
    rows.into_iter().map(row_into_download).collect()
}

/// Convert database row to download
fn row_into_download(row: SqliteRow) -> Result<Download> {
    Ok(Download {
        id: parse_uuid(row.get("id"))?,
        user_id: parse_opt_uuid(row.get("user_id"))?,
        url: row.get("url"),
        title: row.get("title"),
        description: row.get("description"),
        duration: row.get("duration"),
        thumbnail: row.get("thumbnail"),
        quality: row
            .get::<String, _>("quality")
            .parse()
            .map_err(anyhow::Error::msg)?,
        status: row
            .get::<String, _>("status")
            .parse()
            .map_err(anyhow::Error::msg)?,
        progress: row.get("progress"),
        file_path: row.get("file_path"),
        file_size: row.get("file_size"),
        format: row.get("format"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        attempts: row.get("attempts"),
        error_message: row.get("error_message"),
        downloads_count: row.get("downloads_count"),
        last_accessed: row.get("last_accessed"),
        uploaded_to_drive: row.get("uploaded_to_drive"),
        drive_file_id: row.get("drive_file_id"),
        storage_type: row
            .get::<String, _>("storage_type")
            .parse()
            .map_err(anyhow::Error::msg)?,
    })
}
