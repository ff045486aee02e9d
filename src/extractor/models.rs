//! Data structures for video information and download requests

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Metadata reported by `yt-dlp --dump-json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "webpage_url")]
    pub url: String,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default, alias = "filesize_approx")]
    pub filesize: Option<u64>,
}

/// What to fetch and where to put it
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRequest {
    pub url: String,
    /// yt-dlp `-f` expression
    pub format_selector: String,
    pub output_dir: PathBuf,
}

/// A finished file on disk
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub size: Option<i64>,
}

impl DownloadedFile {
    /// Extension of the downloaded file, lowercased
    pub fn format(&self) -> Option<String> {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }
}
