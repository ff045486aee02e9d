//! Periodic maintenance jobs

use crate::database::DatabaseManager;
use crate::domain::Download;
use crate::monitoring::{AlertManager, MonitoringService};
use crate::queue::DownloadQueue;
use crate::security::{RateLimiter, SecurityService};
use crate::storage::{FileStorage, TemporaryUrlService};
use crate::utils::TubeloadError;
use chrono::{Duration as ChronoDuration, Utc};
use path_absolutize::Absolutize;
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type Result<T> = std::result::Result<T, TubeloadError>;

const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(24 * 3600);

const LOG_RETENTION_DAYS: i64 = 30;
const FAILED_RETENTION_DAYS: i64 = 7;
const SECURITY_RETENTION_DAYS: i64 = 30;
const METRIC_RETENTION_DAYS: i64 = 7;
const NOTIFICATION_RETENTION_DAYS: i64 = 30;
const RATE_LIMIT_MAX_AGE_SECS: f64 = 3600.0;

/// Everything the maintenance jobs touch
pub struct Maintenance {
    pub db: DatabaseManager,
    pub storage: FileStorage,
    pub temp_urls: Arc<TemporaryUrlService>,
    pub queue: DownloadQueue,
    pub rate_limiter: Arc<RateLimiter>,
    pub security: Arc<SecurityService>,
    pub monitoring: Arc<MonitoringService>,
    pub alerts: Arc<AlertManager>,
    pub temporary_expiration: Duration,
}

fn normalize(path: &Path) -> PathBuf {
    path.absolutize()
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| path.to_path_buf())
}

impl Maintenance {
    pub async fn cleanup_expired_temp_links(&self) -> Result<usize> {
        self.temp_urls.cleanup_expired().await
    }

    pub async fn cleanup_old_logs(&self) -> Result<usize> {
        let cutoff = Utc::now() - ChronoDuration::days(LOG_RETENTION_DAYS);
        let removed = self.db.delete_logs_older_than(cutoff).await?;
        info!("Removed {} download logs older than {} days", removed, LOG_RETENTION_DAYS);
        Ok(removed as usize)
    }

    async fn remove_download(&self, download: &Download) -> Result<()> {
        if let Some(path) = &download.file_path {
            if let Err(e) = FileStorage::remove_file_if_exists(Path::new(path)).await {
                warn!("Failed to remove {}: {}", path, e);
            }
        }
        self.db.delete_download(download.id).await?;
        Ok(())
    }

    pub async fn cleanup_failed_downloads(&self) -> Result<usize> {
        let cutoff = Utc::now() - ChronoDuration::days(FAILED_RETENTION_DAYS);
        let failed = self.db.failed_downloads_older_than(cutoff).await?;
        let mut removed = 0;
        for download in &failed {
            match self.remove_download(download).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove download {}: {}", download.id, e),
            }
        }
        info!("Removed {} failed downloads", removed);
        Ok(removed)
    }

    /// Scratch entries untouched for an hour
    pub async fn cleanup_temp_dir(&self) -> Result<usize> {
        let temp_dir = self.storage.temp_dir().to_path_buf();
        let stale = tokio::task::spawn_blocking(move || FileStorage::stale_entries(&temp_dir, HOUR))
            .await
            .map_err(|e| TubeloadError::OperationFailed(e.to_string()))?;
        let mut removed = 0;
        for entry in stale {
            match FileStorage::remove_entry(&entry).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove {}: {}", entry.display(), e),
            }
        }
        debug!("Removed {} stale temp entries", removed);
        Ok(removed)
    }

    pub async fn cleanup_temporary_downloads(&self) -> Result<usize> {
        let expiration = ChronoDuration::from_std(self.temporary_expiration)
            .map_err(|e| TubeloadError::OperationFailed(e.to_string()))?;
        let expired = self
            .db
            .temporary_downloads_older_than(Utc::now() - expiration)
            .await?;
        let mut removed = 0;
        for download in &expired {
            match self.remove_download(download).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove download {}: {}", download.id, e),
            }
        }
        info!("Removed {} expired temporary downloads", removed);
        Ok(removed)
    }

    /// Files under the videos directory older than a day that no row references
    pub async fn cleanup_orphaned_files(&self) -> Result<usize> {
        let registered: HashSet<PathBuf> = self
            .db
            .registered_file_paths()
            .await?
            .iter()
            .map(|p| normalize(Path::new(p)))
            .collect();

        let videos_dir = self.storage.videos_dir().to_path_buf();
        let candidates = tokio::task::spawn_blocking(move || FileStorage::stale_files(&videos_dir, DAY))
            .await
            .map_err(|e| TubeloadError::OperationFailed(e.to_string()))?;

        let mut removed = 0;
        for file in candidates {
            if registered.contains(&normalize(&file)) {
                continue;
            }
            match FileStorage::remove_file_if_exists(&file).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to remove orphan {}: {}", file.display(), e),
            }
        }
        info!("Removed {} orphaned files", removed);
        Ok(removed)
    }

    pub async fn update_stats(&self) -> Result<usize> {
        self.queue.update_stats().await?;
        Ok(1)
    }

    pub async fn process_queue(&self) -> Result<usize> {
        Ok(self.queue.process_pending().await?.map_or(0, |_| 1))
    }

    pub async fn cleanup_rate_limiter(&self) -> Result<usize> {
        Ok(self.rate_limiter.cleanup_old_data(RATE_LIMIT_MAX_AGE_SECS))
    }

    pub async fn cleanup_security_and_monitoring(&self) -> Result<usize> {
        let events = self.security.cleanup(SECURITY_RETENTION_DAYS);
        let samples = self.monitoring.cleanup_old_data(METRIC_RETENTION_DAYS);
        let notifications = self.alerts.cleanup_old_notifications(NOTIFICATION_RETENTION_DAYS);
        Ok(events + samples + notifications)
    }

    /// Spawn one interval loop per job. All of them stop when `shutdown` fires.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            self.job("cleanup_expired_temp_links", 2 * HOUR, &shutdown, |m| async move {
                m.cleanup_expired_temp_links().await
            }),
            self.job("cleanup_old_logs", 7 * DAY, &shutdown, |m| async move { m.cleanup_old_logs().await }),
            self.job("cleanup_failed_downloads", DAY, &shutdown, |m| async move {
                m.cleanup_failed_downloads().await
            }),
            self.job("cleanup_temp_dir", HOUR, &shutdown, |m| async move { m.cleanup_temp_dir().await }),
            self.job("cleanup_temporary_downloads", HOUR, &shutdown, |m| async move {
                m.cleanup_temporary_downloads().await
            }),
            self.job("cleanup_orphaned_files", DAY, &shutdown, |m| async move {
                m.cleanup_orphaned_files().await
            }),
            self.job("update_stats", Duration::from_secs(600), &shutdown, |m| async move {
                m.update_stats().await
            }),
            self.job("process_queue", Duration::from_secs(30), &shutdown, |m| async move {
                m.process_queue().await
            }),
            self.job("cleanup_rate_limiter", Duration::from_secs(600), &shutdown, |m| async move {
                m.cleanup_rate_limiter().await
            }),
            self.job("cleanup_security_and_monitoring", DAY, &shutdown, |m| async move {
                m.cleanup_security_and_monitoring().await
            }),
        ]
    }

    fn job<F, Fut>(
        self: &Arc<Self>,
        name: &'static str,
        period: Duration,
        shutdown: &CancellationToken,
        run: F,
    ) -> JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<usize>> + Send + 'static,
    {
        let this = Arc::clone(self);
        every(name, period, shutdown.clone(), move || run(Arc::clone(&this)))
    }
}

fn every<F, Fut>(name: &'static str, period: Duration, shutdown: CancellationToken, job: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<usize>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => match job().await {
                    Ok(count) => debug!("Job {} finished ({})", name, count),
                    Err(e) => error!("Job {} failed: {}", name, e),
                },
            }
        }
        debug!("Job {} stopped", name);
    })
}
