//! Download worker lifecycle against a scripted extractor

mod common;

use async_trait::async_trait;
use common::{test_state, test_state_with, FakeExtractor, Script};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tubeload::extractor::{DownloadRequest, DownloadedFile, MediaExtractor, VideoInfo};
use tubeload::TubeloadError;
use tubeload::domain::{Download, DownloadQuality, DownloadStatus, LogAction, StorageType};
use tubeload::notify::{Channel, Filter};
use tubeload::SharedState;
use uuid::Uuid;

const URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

async fn pending(state: &SharedState, url: &str) -> Uuid {
    let download = Download::new(url, DownloadQuality::Best);
    state.db.create_download(&download).await.unwrap();
    download.id
}

async fn reload(state: &SharedState, id: Uuid) -> Download {
    state.db.get_download(id).await.unwrap().expect("download row")
}

#[tokio::test]
async fn completed_download_is_promoted_and_logged() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir, FakeExtractor::new(vec![Script::Succeed])).await;
    let id = pending(&state, URL).await;
    let mut events = state.hub.subscribe(Filter::Channel(Channel::Download(id)));

    state.queue.run_download(id).await;

    let download = reload(&state, id).await;
    assert_eq!(download.status, DownloadStatus::Completed);
    assert_eq!(download.progress, 100.0);
    assert_eq!(download.attempts, 1);
    assert_eq!(download.title.as_deref(), Some("Test Clip"));
    assert_eq!(download.duration, Some(12));
    assert_eq!(download.format.as_deref(), Some("mp4"));

    let path = download.file_path.expect("file path");
    assert!(Path::new(&path).starts_with(state.storage.dir_for(StorageType::Temporary)));
    assert!(Path::new(&path).exists());

    let logs = state.db.logs_for_download(id, None, 10).await.unwrap();
    assert!(logs.iter().any(|l| l.action == LogAction::DownloadStarted));
    assert!(logs.iter().any(|l| l.action == LogAction::DownloadCompleted));

    let mut kinds = Vec::new();
    while let Ok(Some(n)) = tokio::time::timeout(Duration::from_millis(50), events.recv()).await {
        kinds.push(n.data["status"].as_str().unwrap_or_default().to_string());
    }
    assert_eq!(kinds.first().map(String::as_str), Some("downloading"));
    assert_eq!(kinds.last().map(String::as_str), Some("completed"));
}

#[tokio::test]
async fn failure_without_retries_left_stays_failed() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir, FakeExtractor::new(vec![Script::Fail("boom")])).await;
    let id = pending(&state, URL).await;

    state.queue.run_download(id).await;

    let download = reload(&state, id).await;
    assert_eq!(download.status, DownloadStatus::Failed);
    assert!(download.error_message.unwrap().contains("boom"));
    assert!(download.file_path.is_none());

    let logs = state
        .db
        .logs_for_download(id, Some(LogAction::DownloadFailed), 10)
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
}

#[tokio::test]
async fn retry_failed_resets_rows_with_attempts_left() {
    let dir = TempDir::new().unwrap();
    let extractor = FakeExtractor::new(vec![Script::Fail("first"), Script::Succeed]);
    let state = test_state(&dir, extractor.clone()).await;
    let id = pending(&state, URL).await;

    state.queue.run_download(id).await;
    assert_eq!(reload(&state, id).await.status, DownloadStatus::Failed);

    assert_eq!(state.queue.retry_failed().await.unwrap(), 1);
    let download = reload(&state, id).await;
    assert_eq!(download.status, DownloadStatus::Pending);
    assert!(download.error_message.is_none());

    state.queue.run_download(id).await;
    let download = reload(&state, id).await;
    assert_eq!(download.status, DownloadStatus::Completed);
    assert_eq!(download.attempts, 2);
    assert_eq!(extractor.calls(), 2);
}

#[tokio::test]
async fn cancel_stops_a_running_download() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir, FakeExtractor::new(vec![Script::Hang])).await;
    let id = pending(&state, URL).await;

    let queue = state.queue.clone();
    let running = tokio::spawn(async move { queue.run_download(id).await });

    for _ in 0..100 {
        if state.queue.is_active(id) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(state.queue.is_active(id));
    assert!(state.queue.cancel(id).await.unwrap());

    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("worker finished")
        .unwrap();
    assert!(!state.queue.is_active(id));
    assert_eq!(reload(&state, id).await.status, DownloadStatus::Cancelled);
}

#[tokio::test]
async fn cancel_unknown_download_returns_false() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir, FakeExtractor::new(vec![])).await;
    assert!(!state.queue.cancel(Uuid::new_v4()).await.unwrap());
}

#[tokio::test]
async fn non_pending_rows_are_skipped() {
    let dir = TempDir::new().unwrap();
    let extractor = FakeExtractor::new(vec![]);
    let state = test_state(&dir, extractor.clone()).await;
    let mut download = Download::new(URL, DownloadQuality::Best);
    download.cancel();
    state.db.create_download(&download).await.unwrap();

    state.queue.run_download(download.id).await;
    assert_eq!(extractor.calls(), 0);
    assert_eq!(reload(&state, download.id).await.status, DownloadStatus::Cancelled);
}

#[tokio::test]
async fn workers_drain_resumed_rows() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir, FakeExtractor::new(vec![])).await;
    let first = pending(&state, URL).await;
    let second = pending(&state, "https://youtu.be/9bZkp7q19f0").await;

    let mut stale = Download::new("https://youtu.be/kJQP7kiw5Fk", DownloadQuality::Best);
    stale.start();
    state.db.create_download(&stale).await.unwrap();

    assert_eq!(state.queue.resume_pending().await.unwrap(), 3);

    let shutdown = tokio_util::sync::CancellationToken::new();
    let handles = state.queue.start(shutdown.clone());
    for _ in 0..200 {
        let done = state
            .db
            .get_downloads_by_status(DownloadStatus::Completed)
            .await
            .unwrap()
            .len();
        if done == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown.cancel();
    for handle in handles {
        handle.await.unwrap();
    }

    for id in [first, second, stale.id] {
        assert_eq!(reload(&state, id).await.status, DownloadStatus::Completed);
    }
}

async fn wait_for_status(state: &SharedState, id: Uuid, status: DownloadStatus) -> Download {
    for _ in 0..500 {
        let download = reload(state, id).await;
        if download.status == status {
            return download;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("download {} never reached {}", id, status);
}

#[tokio::test]
async fn failed_download_is_retried_after_backoff() {
    let dir = TempDir::new().unwrap();
    let extractor = FakeExtractor::new(vec![Script::Fail("connection reset"), Script::Succeed]);
    let state = test_state_with(&dir, extractor.clone(), |s| {
        s.max_retries = 1;
        s.retry_backoff_max_secs = 1;
    })
    .await;
    let id = pending(&state, URL).await;

    let shutdown = CancellationToken::new();
    let handles = state.queue.start(shutdown.clone());
    state.queue.enqueue(id);

    let download = wait_for_status(&state, id, DownloadStatus::Completed).await;
    assert_eq!(download.attempts, 2);
    assert_eq!(download.error_message, None);
    assert_eq!(extractor.calls(), 2);

    let logs = state.db.logs_for_download(id, None, 20).await.unwrap();
    assert!(logs.iter().any(|l| l.action == LogAction::DownloadFailed));
    assert!(logs.iter().any(|l| l.action == LogAction::DownloadCompleted));

    shutdown.cancel();
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn retries_stop_once_attempts_are_used_up() {
    let dir = TempDir::new().unwrap();
    let extractor = FakeExtractor::new(vec![Script::Fail("first"), Script::Fail("second"), Script::Succeed]);
    let state = test_state_with(&dir, extractor.clone(), |s| {
        s.max_retries = 1;
        s.retry_backoff_max_secs = 0;
    })
    .await;
    let id = pending(&state, URL).await;

    let shutdown = CancellationToken::new();
    let handles = state.queue.start(shutdown.clone());
    state.queue.enqueue(id);

    for _ in 0..500 {
        if extractor.calls() == 2 && !state.queue.is_active(id) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let download = wait_for_status(&state, id, DownloadStatus::Failed).await;
    // Give a stray retry the chance to show up
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(extractor.calls(), 2);
    assert_eq!(download.attempts, 2);
    assert!(download.error_message.unwrap().contains("second"));

    shutdown.cancel();
    for handle in handles {
        handle.await.unwrap();
    }
}

/// Holds `extract_info` open until released and counts download calls
#[derive(Default)]
struct GatedExtractor {
    entered: Notify,
    release: Notify,
    downloads: AtomicUsize,
}

#[async_trait]
impl MediaExtractor for GatedExtractor {
    fn id(&self) -> &'static str {
        "gated"
    }

    async fn extract_info(&self, url: &str) -> Result<VideoInfo, TubeloadError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(VideoInfo {
            id: "dQw4w9WgXcQ".to_string(),
            title: "Late Title".to_string(),
            url: url.to_string(),
            ..Default::default()
        })
    }

    async fn download(
        &self,
        _request: &DownloadRequest,
        _progress: mpsc::UnboundedSender<f64>,
        _cancel: CancellationToken,
    ) -> Result<DownloadedFile, TubeloadError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Err(TubeloadError::DownloadError("transfer started".to_string()))
    }
}

#[tokio::test]
async fn cancel_during_metadata_lookup_is_not_overwritten() {
    let dir = TempDir::new().unwrap();
    let extractor = Arc::new(GatedExtractor::default());
    let state = test_state_with(&dir, extractor.clone(), |_| {}).await;
    let id = pending(&state, URL).await;

    let queue = state.queue.clone();
    let running = tokio::spawn(async move { queue.run_download(id).await });

    tokio::time::timeout(Duration::from_secs(5), extractor.entered.notified())
        .await
        .expect("metadata lookup started");
    assert!(state.queue.cancel(id).await.unwrap());
    assert_eq!(reload(&state, id).await.status, DownloadStatus::Cancelled);

    let mut events = state.hub.subscribe(Filter::Channel(Channel::Download(id)));
    extractor.release.notify_one();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("worker finished")
        .unwrap();

    assert_eq!(extractor.downloads.load(Ordering::SeqCst), 0);
    assert_eq!(reload(&state, id).await.status, DownloadStatus::Cancelled);
    while let Ok(Some(n)) = tokio::time::timeout(Duration::from_millis(50), events.recv()).await {
        assert_ne!(n.data["status"], "downloading");
    }
    let logs = state.db.logs_for_download(id, None, 10).await.unwrap();
    assert!(logs.iter().any(|l| l.action == LogAction::DownloadCancelled));
}

