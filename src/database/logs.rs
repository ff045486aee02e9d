//! Download log persistence

use super::operations::{parse_opt_uuid, parse_uuid, DatabaseManager};
use crate::domain::{DownloadLog, LogAction};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, Row};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct LogStats {
    pub total: i64,
    pub by_action: BTreeMap<String, i64>,
    /// MB/s
    pub average_speed: Option<f64>,
    /// Seconds
    pub average_duration: Option<f64>,
}

impl DatabaseManager {
    pub async fn create_log(&self, log: &DownloadLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO download_logs
            (id, download_id, user_id, action, video_url, video_title, video_format,
             video_quality, start_time, end_time, download_duration, download_speed,
             file_size_downloaded, progress_percentage, status, error_message, retry_count,
             ip_address, user_agent, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(log.id.to_string())
        .bind(log.download_id.map(|id| id.to_string()))
        .bind(log.user_id.map(|id| id.to_string()))
        .bind(log.action.as_str())
        .bind(&log.video_url)
        .bind(&log.video_title)
        .bind(&log.video_format)
        .bind(&log.video_quality)
        .bind(log.start_time)
        .bind(log.end_time)
        .bind(log.download_duration)
        .bind(log.download_speed)
        .bind(log.file_size_downloaded)
        .bind(log.progress_percentage)
        .bind(&log.status)
        .bind(&log.error_message)
        .bind(log.retry_count)
        .bind(&log.ip_address)
        .bind(&log.user_agent)
        .bind(log.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Newest first, optionally restricted to one action
    pub async fn logs_for_download(
        &self,
        download_id: Uuid,
        action: Option<LogAction>,
        limit: i64,
    ) -> Result<Vec<DownloadLog>> {
        let rows = match action {
            Some(action) => {
                sqlx::query(
                    "SELECT * FROM download_logs WHERE download_id = ? AND action = ?
                     ORDER BY created_at DESC LIMIT ?",
                )
                .bind(download_id.to_string())
                .bind(action.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM download_logs WHERE download_id = ? ORDER BY created_at DESC LIMIT ?")
                    .bind(download_id.to_string())
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(row_into_log).collect()
    }

    pub async fn delete_logs_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM download_logs WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn log_stats(&self) -> Result<LogStats> {
        let mut stats = LogStats::default();
        let rows = sqlx::query("SELECT action, COUNT(*) AS n FROM download_logs GROUP BY action")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            let n: i64 = row.get("n");
            stats.total += n;
            stats.by_action.insert(row.get("action"), n);
        }

        let row = sqlx::query(
            "SELECT AVG(download_speed) AS speed, AVG(download_duration) AS duration
             FROM download_logs WHERE action = 'download_completed'",
        )
        .fetch_one(&self.pool)
        .await?;
        stats.average_speed = row.get("speed");
        stats.average_duration = row.get("duration");

        Ok(stats)
    }
}

fn row_into_log(row: SqliteRow) -> Result<DownloadLog> {
    Ok(DownloadLog {
        id: parse_uuid(row.get("id"))?,
        download_id: parse_opt_uuid(row.get("download_id"))?,
        user_id: parse_opt_uuid(row.get("user_id"))?,
        action: row
            .get::<String, _>("action")
            .parse()
            .map_err(anyhow::Error::msg)?,
        video_url: row.get("video_url"),
        video_title: row.get("video_title"),
        video_format: row.get("video_format"),
        video_quality: row.get("video_quality"),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        download_duration: row.get("download_duration"),
        download_speed: row.get("download_speed"),
        file_size_downloaded: row.get("file_size_downloaded"),
        progress_percentage: row.get("progress_percentage"),
        status: row.get("status"),
        error_message: row.get("error_message"),
        retry_count: row.get("retry_count"),
        ip_address: row.get("ip_address"),
        user_agent: row.get("user_agent"),
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::initialize_database;
    use crate::domain::{Download, DownloadQuality};
    use chrono::Duration;

    #[tokio::test]
    async fn test_logs_filter_stats_and_cleanup() {
        let db = DatabaseManager::new(initialize_database("sqlite::memory:").await.unwrap());
        let d = Download::new("https://example.com/v", DownloadQuality::Best);
        db.create_download(&d).await.unwrap();

        let started = DownloadLog::new(LogAction::DownloadStarted, &d.url, "t", "downloading")
            .for_download(d.id);
        let mut done = DownloadLog::new(LogAction::DownloadCompleted, &d.url, "t", "completed")
            .for_download(d.id);
        done.download_speed = Some(2.0);
        done.download_duration = Some(10.0);
        let mut old = DownloadLog::new(LogAction::AccessTempUrl, &d.url, "t", "completed")
            .for_download(d.id);
        old.created_at = Utc::now() - Duration::days(40);

        for log in [&started, &done, &old] {
            db.create_log(log).await.unwrap();
        }

        assert_eq!(db.logs_for_download(d.id, None, 10).await.unwrap().len(), 3);
        let access = db
            .logs_for_download(d.id, Some(LogAction::AccessTempUrl), 10)
            .await
            .unwrap();
        assert_eq!(access.len(), 1);

        let stats = db.log_stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_action.get("download_completed"), Some(&1));
        assert_eq!(stats.average_speed, Some(2.0));

        let removed = db
            .delete_logs_older_than(Utc::now() - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }
}
