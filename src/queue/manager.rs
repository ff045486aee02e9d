//! Download queue with a fixed pool of workers

use crate::database::DatabaseManager;
use crate::domain::{Download, DownloadLog, DownloadStatus, LogAction};
use crate::extractor::{DownloadRequest, MediaExtractor};
use crate::notify::NotificationHub;
use crate::storage::{FileStorage, RelayService};
use crate::utils::{AppSettings, TubeloadError};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type Result<T> = std::result::Result<T, TubeloadError>;

/// Minimum change in percent before progress is persisted and broadcast
const PROGRESS_STEP: f64 = 1.0;

/// Failed downloads with fewer attempts are picked up by `retry_failed`
const RETRY_FAILED_MAX_ATTEMPTS: i64 = 3;

#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub retry_backoff_max: Duration,
    pub upload_to_drive: bool,
}

impl From<&AppSettings> for QueueOptions {
    fn from(settings: &AppSettings) -> Self {
        Self {
            max_concurrent: settings.max_concurrent_downloads.max(1),
            max_retries: settings.max_retries,
            retry_backoff_max: Duration::from_secs(settings.retry_backoff_max_secs),
            upload_to_drive: settings.upload_to_drive,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueueSnapshot {
    pub pending: i64,
    pub active: usize,
    pub active_ids: Vec<Uuid>,
}

/// Cheap to clone; all clones share the same workers
#[derive(Clone)]
pub struct DownloadQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    db: DatabaseManager,
    hub: Arc<NotificationHub>,
    extractor: Arc<dyn MediaExtractor>,
    storage: FileStorage,
    relay: Option<Arc<RelayService>>,
    options: QueueOptions,
    jobs_tx: mpsc::UnboundedSender<Uuid>,
    jobs_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Uuid>>>,
    // Submitted but not yet picked up by a worker
    queued: Mutex<HashSet<Uuid>>,
    active: Mutex<HashMap<Uuid, CancellationToken>>,
    shutdown: CancellationToken,
}

/// Exponential backoff in whole seconds, capped at `max`
pub fn retry_delay(attempt: i64, max: Duration) -> Duration {
    let exp = attempt.clamp(0, 32) as u32;
    Duration::from_secs(2u64.saturating_pow(exp)).min(max)
}

impl DownloadQueue {
    pub fn new(
        db: DatabaseManager,
        hub: Arc<NotificationHub>,
        extractor: Arc<dyn MediaExtractor>,
        storage: FileStorage,
        relay: Option<Arc<RelayService>>,
        options: QueueOptions,
    ) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(QueueInner {
                db,
                hub,
                extractor,
                storage,
                relay,
                options,
                jobs_tx,
                jobs_rx: Arc::new(tokio::sync::Mutex::new(jobs_rx)),
                queued: Mutex::new(HashSet::new()),
                active: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Spawn the worker pool. Workers stop when `shutdown` is cancelled.
    pub fn start(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let workers = self.inner.options.max_concurrent;
        info!("Starting {} download worker(s) using {}", workers, self.inner.extractor.id());

        let inner = Arc::clone(&self.inner);
        let stop = inner.shutdown.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            stop.cancel();
        });

        (0..workers)
            .map(|worker| {
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move { inner.worker_loop(worker).await })
            })
            .collect()
    }

    /// Submit a download id to the workers
    pub fn enqueue(&self, id: Uuid) {
        self.inner.enqueue(id);
    }

    /// Start the oldest pending download, if any
    pub async fn process_pending(&self) -> Result<Option<Uuid>> {
        let pending = self.inner.db.get_pending_downloads(1).await?;
        Ok(pending.into_iter().next().map(|d| {
            self.enqueue(d.id);
            d.id
        }))
    }

    /// Reset failed downloads that still have attempts left and resubmit them
    pub async fn retry_failed(&self) -> Result<usize> {
        let failed = self.inner.db.get_downloads_by_status(DownloadStatus::Failed).await?;
        let mut count = 0;
        for mut download in failed {
            if download.attempts >= RETRY_FAILED_MAX_ATTEMPTS {
                continue;
            }
            download.reset_for_retry();
            self.inner.db.update_download(&download).await?;
            self.enqueue(download.id);
            count += 1;
        }
        if count > 0 {
            info!("Resubmitted {} failed download(s)", count);
        }
        Ok(count)
    }

    /// Requeue work left over from a previous run. Rows stuck in
    /// `downloading` lost their worker and go back to `pending`.
    pub async fn resume_pending(&self) -> Result<usize> {
        for mut stale in self.inner.db.get_downloads_by_status(DownloadStatus::Downloading).await? {
            if self.is_active(stale.id) {
                continue;
            }
            stale.reset_for_retry();
            self.inner.db.update_download(&stale).await?;
        }
        let pending = self.inner.db.get_downloads_by_status(DownloadStatus::Pending).await?;
        for download in &pending {
            self.enqueue(download.id);
        }
        if !pending.is_empty() {
            info!("Resumed {} pending download(s)", pending.len());
        }
        Ok(pending.len())
    }

    /// Stop a running download and mark the row cancelled.
    /// Returns false when the row does not exist.
    pub async fn cancel(&self, id: Uuid) -> Result<bool> {
        if let Some(token) = self.inner.active.lock().get(&id) {
            token.cancel();
        }
        self.inner.queued.lock().remove(&id);

        let Some(mut download) = self.inner.db.get_download(id).await? else {
            return Ok(false);
        };
        if matches!(download.status, DownloadStatus::Pending | DownloadStatus::Downloading) {
            download.cancel();
            self.inner.db.update_download(&download).await?;
            info!("Cancelled download {}", id);
        }
        Ok(true)
    }

    pub fn active_ids(&self) -> Vec<Uuid> {
        self.inner.active_ids()
    }

    pub fn is_active(&self, id: Uuid) -> bool {
        self.inner.active.lock().contains_key(&id)
    }

    pub async fn queue_snapshot(&self) -> Result<QueueSnapshot> {
        self.inner.snapshot().await
    }

    /// Publish current download statistics on the stats channel
    pub async fn update_stats(&self) -> Result<()> {
        let stats = self.inner.db.download_stats().await?;
        self.inner.hub.send_stats_update(serde_json::to_value(&stats)?);
        Ok(())
    }

    /// Run one job on the calling task, bypassing the worker pool
    pub async fn run_download(&self, id: Uuid) {
        Arc::clone(&self.inner).run_download(id).await;
    }
}

impl QueueInner {
    fn enqueue(&self, id: Uuid) {
        if !self.queued.lock().insert(id) {
            debug!("Download {} is already queued", id);
            return;
        }
        if self.jobs_tx.send(id).is_err() {
            self.queued.lock().remove(&id);
            warn!("Job channel closed, dropping download {}", id);
            return;
        }
        debug!("Queued download {}", id);
    }

    fn active_ids(&self) -> Vec<Uuid> {
        self.active.lock().keys().copied().collect()
    }

    async fn snapshot(&self) -> Result<QueueSnapshot> {
        let pending = self
            .db
            .list_downloads(Some(DownloadStatus::Pending), 1, 0)
            .await?
            .total;
        let active_ids = self.active_ids();
        Ok(QueueSnapshot {
            pending,
            active: active_ids.len(),
            active_ids,
        })
    }

    async fn worker_loop(self: Arc<Self>, worker: usize) {
        debug!("Download worker {} started", worker);
        loop {
            let next = {
                let mut rx = self.jobs_rx.lock().await;
                tokio::select! {
                    _ = self.shutdown.cancelled() => None,
                    id = rx.recv() => id,
                }
            };
            let Some(id) = next else { break };
            self.queued.lock().remove(&id);

            Arc::clone(&self).run_download(id).await;

            match self.snapshot().await {
                Ok(snapshot) => match serde_json::to_value(&snapshot) {
                    Ok(data) => self.hub.send_queue_update(data),
                    Err(e) => warn!("Failed to encode queue snapshot: {}", e),
                },
                Err(e) => warn!("Failed to read queue snapshot: {}", e),
            }
        }
        debug!("Download worker {} stopped", worker);
    }

    async fn write_log(&self, log: DownloadLog) {
        if let Err(e) = self.db.create_log(&log).await {
            warn!("Failed to write {} log: {}", log.action, e);
        }
    }

    async fn persist(&self, download: &Download) {
        if let Err(e) = self.db.update_download(download).await {
            error!("Failed to persist download {}: {}", download.id, e);
        }
    }

    /// Persist a running job unless it was cancelled. A cancellation seen
    /// here also cancels `token`, so the caller takes the cancelled path.
    async fn save_running(&self, download: &Download, token: &CancellationToken) -> Result<()> {
        if !token.is_cancelled() && self.db.update_download_unless_cancelled(download).await? {
            return Ok(());
        }
        token.cancel();
        Err(TubeloadError::OperationFailed(format!("Download {} was cancelled", download.id)))
    }

    async fn run_download(self: Arc<Self>, id: Uuid) {
        let mut download = match self.db.get_download(id).await {
            Ok(Some(d)) => d,
            Ok(None) => {
                error!("Download {} not found, dropping job", id);
                return;
            }
            Err(e) => {
                error!("Failed to load download {}: {}", id, e);
                return;
            }
        };
        if download.status != DownloadStatus::Pending {
            debug!("Skipping download {} in state {}", id, download.status);
            return;
        }

        let token = CancellationToken::new();
        {
            let mut active = self.active.lock();
            if active.contains_key(&id) {
                return;
            }
            active.insert(id, token.clone());
        }

        let outcome = self.execute(&mut download, token.clone()).await;
        self.active.lock().remove(&id);

        match outcome {
            Ok(()) => {}
            Err(_) if token.is_cancelled() => {
                download.cancel();
                self.persist(&download).await;
                self.write_log(
                    DownloadLog::new(
                        LogAction::DownloadCancelled,
                        &download.url,
                        download.title.clone().unwrap_or_default(),
                        "cancelled",
                    )
                    .for_download(id),
                )
                .await;
                info!("Download {} was cancelled", id);
            }
            Err(e) => self.handle_failure(download, e).await,
        }
    }

    async fn execute(&self, download: &mut Download, token: CancellationToken) -> Result<()> {
        download.start();
        self.save_running(download, &token).await?;
        self.hub
            .notify_download_progress(download.id, 0.0, "downloading", None, None, Some(&download.url));

        let started = Utc::now();
        let mut start_log = DownloadLog::new(LogAction::DownloadStarted, &download.url, "", "downloading")
            .for_download(download.id);
        start_log.user_id = download.user_id;
        start_log.video_quality = Some(download.quality.to_string());
        start_log.retry_count = download.attempts - 1;
        start_log.start_time = Some(started);
        self.write_log(start_log).await;
        info!("Starting download {} ({})", download.id, download.url);

        let info = self.extractor.extract_info(&download.url).await?;
        if !info.title.is_empty() {
            download.title = Some(info.title.clone());
        }
        download.description = info.description.clone();
        download.duration = info.duration.map(|d| d.round() as i64);
        download.thumbnail = info.thumbnail.clone();
        download.format = info.ext.clone();
        self.save_running(download, &token).await?;

        let request = DownloadRequest {
            url: download.url.clone(),
            format_selector: download.quality.to_format_selector(),
            output_dir: self.storage.videos_dir().to_path_buf(),
        };
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let transfer = self.extractor.download(&request, progress_tx, token.clone());
        tokio::pin!(transfer);

        let mut last_reported = 0.0;
        let file = loop {
            tokio::select! {
                result = &mut transfer => break result?,
                Some(progress) = progress_rx.recv() => {
                    if (progress - last_reported).abs() < PROGRESS_STEP {
                        continue;
                    }
                    last_reported = progress;
                    download.update_progress(progress);
                    self.save_running(download, &token).await?;
                    self.hub.notify_download_progress(
                        download.id,
                        download.progress,
                        "downloading",
                        download.title.as_deref(),
                        download.thumbnail.as_deref(),
                        Some(&download.url),
                    );
                }
            }
        };

        let path = self.storage.promote(&file.path, download.storage_type).await?;
        let format = file.format().or_else(|| download.format.clone());
        download.format = format;
        download.complete(path.to_string_lossy(), file.size);
        self.save_running(download, &token).await?;
        self.hub.notify_download_completed(
            download.id,
            download.title.as_deref(),
            download.file_path.as_deref(),
            download.file_size,
            download.format.as_deref(),
        );

        let mut done_log = DownloadLog::new(
            LogAction::DownloadCompleted,
            &download.url,
            download.title.clone().unwrap_or_default(),
            "completed",
        )
        .for_download(download.id);
        done_log.user_id = download.user_id;
        done_log.video_format = download.format.clone();
        done_log.video_quality = Some(download.quality.to_string());
        done_log.start_time = Some(started);
        done_log.end_time = Some(Utc::now());
        done_log.file_size_downloaded = download.file_size;
        done_log.progress_percentage = Some(100.0);
        done_log.calculate_duration();
        done_log.calculate_speed();
        self.write_log(done_log).await;
        info!("Download {} completed: {}", download.id, path.display());

        if self.options.upload_to_drive {
            if let Some(relay) = &self.relay {
                if let Err(e) = relay.relay(download.id).await {
                    warn!("Relay of download {} failed: {}", download.id, e);
                }
            }
        }
        Ok(())
    }

    async fn handle_failure(self: Arc<Self>, mut download: Download, e: TubeloadError) {
        let message = e.to_string();
        error!("Download {} failed: {}", download.id, message);
        download.fail(&message);
        self.persist(&download).await;
        self.hub.notify_download_failed(download.id, &message);

        let mut log = DownloadLog::new(
            LogAction::DownloadFailed,
            &download.url,
            download.title.clone().unwrap_or_default(),
            "failed",
        )
        .for_download(download.id)
        .with_error(&message);
        log.user_id = download.user_id;
        log.retry_count = download.attempts;
        log.progress_percentage = Some(download.progress);
        self.write_log(log).await;

        if download.attempts > i64::from(self.options.max_retries) {
            info!("Download {} exhausted its {} attempt(s)", download.id, download.attempts);
            return;
        }

        let delay = retry_delay(download.attempts, self.options.retry_backoff_max);
        info!("Retrying download {} in {:?}", download.id, delay);
        let id = download.id;
        tokio::spawn(async move {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            // The row may have been deleted or cancelled while waiting
            match self.db.get_download(id).await {
                Ok(Some(mut d)) if d.status == DownloadStatus::Failed => {
                    d.reset_for_retry();
                    self.persist(&d).await;
                    self.enqueue(id);
                }
                Ok(_) => debug!("Download {} changed while waiting to retry", id),
                Err(e) => warn!("Failed to reload download {} for retry: {}", id, e),
            }
        });
    }
}
