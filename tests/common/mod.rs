//! Shared fixtures: in-memory database, temp storage and a scripted extractor

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tubeload::extractor::{DownloadRequest, DownloadedFile, MediaExtractor, VideoInfo};
use tubeload::{AppSettings, AppState, SharedState, TubeloadError};

/// What the fake extractor does for one download call
#[derive(Clone)]
pub enum Script {
    Succeed,
    Fail(&'static str),
    /// Block until cancelled
    Hang,
}

pub struct FakeExtractor {
    scripts: Mutex<VecDeque<Script>>,
    pub calls: Mutex<usize>,
}

impl FakeExtractor {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            calls: Mutex::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl MediaExtractor for FakeExtractor {
    fn id(&self) -> &'static str {
        "fake"
    }

    async fn extract_info(&self, url: &str) -> Result<VideoInfo, TubeloadError> {
        Ok(VideoInfo {
            id: "dQw4w9WgXcQ".to_string(),
            title: "Test Clip".to_string(),
            url: url.to_string(),
            duration: Some(12.4),
            ext: Some("mp4".to_string()),
            ..Default::default()
        })
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        progress: mpsc::UnboundedSender<f64>,
        cancel: CancellationToken,
    ) -> Result<DownloadedFile, TubeloadError> {
        let call = {
            let mut calls = self.calls.lock();
            *calls += 1;
            *calls
        };
        let script = self.scripts.lock().pop_front().unwrap_or(Script::Succeed);
        match script {
            Script::Succeed => {
                for pct in [25.0, 50.0, 100.0] {
                    let _ = progress.send(pct);
                }
                tokio::fs::create_dir_all(&request.output_dir).await?;
                let path = request.output_dir.join(format!("clip-{}.mp4", call));
                tokio::fs::write(&path, b"not really a video").await?;
                Ok(DownloadedFile { path, size: Some(18) })
            }
            Script::Fail(message) => Err(TubeloadError::DownloadError(message.to_string())),
            Script::Hang => {
                cancel.cancelled().await;
                Err(TubeloadError::DownloadError("cancelled".to_string()))
            }
        }
    }
}

pub fn test_settings(dir: &TempDir) -> AppSettings {
    let root = dir.path();
    let mut settings = AppSettings::default();
    settings.database_url = "sqlite::memory:".to_string();
    settings.secret_key = "test-secret".to_string();
    settings.videos_dir = root.join("videos");
    settings.permanent_dir = root.join("videos/permanent");
    settings.temporary_dir = root.join("videos/temporary");
    settings.temp_dir = root.join("videos/temp");
    settings.max_retries = 0;
    settings.retry_backoff_max_secs = 1;
    settings.rate_limit_per_minute = 10_000;
    settings.rate_limit_per_hour = 100_000;
    settings
}

pub async fn test_state(dir: &TempDir, extractor: Arc<FakeExtractor>) -> SharedState {
    test_state_with(dir, extractor, |_| {}).await
}

/// Like `test_state`, with a chance to adjust settings and any extractor
pub async fn test_state_with(
    dir: &TempDir,
    extractor: Arc<dyn MediaExtractor>,
    configure: impl FnOnce(&mut AppSettings),
) -> SharedState {
    let mut settings = test_settings(dir);
    configure(&mut settings);
    AppState::build_with_extractor(settings, extractor)
        .await
        .expect("state")
}
