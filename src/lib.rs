//! Tubeload library
//!
//! A self-hosted YouTube download service: yt-dlp drives the transfer, a
//! worker queue tracks it in SQLite, and an axum API exposes downloads,
//! temporary links, accounts, monitoring and live progress.

pub mod api;
pub mod app;
pub mod auth;
pub mod database;
pub mod domain;
pub mod extractor;
pub mod monitoring;
pub mod notify;
pub mod queue;
pub mod scheduler;
pub mod security;
pub mod storage;
pub mod utils;

// Re-export main types for easier use
pub use app::{AppState, SharedState};
pub use domain::{Download, DownloadQuality, DownloadStatus, StorageType, User};
pub use extractor::{MediaExtractor, VideoInfo, YtDlpExtractor};
pub use queue::DownloadQueue;
pub use utils::{AppSettings, TubeloadError};
