//! Download entity and its status/quality value types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle of a download row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    #[default]
    Pending,
    Downloading,
    Completed,
    Failed,
    Cancelled,
    UploadingToDrive,
    UploadedToDrive,
    Expired,
}

impl DownloadStatus {
    pub const ALL: [DownloadStatus; 8] = [
        DownloadStatus::Pending,
        DownloadStatus::Downloading,
        DownloadStatus::Completed,
        DownloadStatus::Failed,
        DownloadStatus::Cancelled,
        DownloadStatus::UploadingToDrive,
        DownloadStatus::UploadedToDrive,
        DownloadStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Cancelled => "cancelled",
            DownloadStatus::UploadingToDrive => "uploading_to_drive",
            DownloadStatus::UploadedToDrive => "uploaded_to_drive",
            DownloadStatus::Expired => "expired",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: DownloadStatus) -> bool {
        use DownloadStatus::*;
        matches!(
            (self, next),
            (Pending, Downloading)
                | (Pending, Cancelled)
                | (Downloading, Completed)
                | (Downloading, Failed)
                | (Downloading, Cancelled)
                | (Failed, Pending)
                | (Cancelled, Pending)
                | (Completed, UploadingToDrive)
                | (UploadingToDrive, UploadedToDrive)
                | (UploadingToDrive, Completed)
                | (Completed, Expired)
                | (UploadedToDrive, Expired)
        )
    }

    /// Terminal for the worker: nothing more will happen without user action
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed
                | DownloadStatus::Failed
                | DownloadStatus::Cancelled
                | DownloadStatus::UploadedToDrive
                | DownloadStatus::Expired
        )
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DownloadStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Unknown download status: {}", s))
    }
}

/// Requested quality, passed to yt-dlp as a format selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DownloadQuality {
    #[default]
    #[serde(rename = "best")]
    Best,
    #[serde(rename = "worst")]
    Worst,
    #[serde(rename = "bv+ba")]
    BestVideoAudio,
    #[serde(rename = "bv")]
    BestVideo,
    #[serde(rename = "ba")]
    BestAudio,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "240p")]
    P240,
    #[serde(rename = "144p")]
    P144,
}

impl DownloadQuality {
    pub const ALL: [DownloadQuality; 11] = [
        DownloadQuality::Best,
        DownloadQuality::Worst,
        DownloadQuality::BestVideoAudio,
        DownloadQuality::BestVideo,
        DownloadQuality::BestAudio,
        DownloadQuality::P1080,
        DownloadQuality::P720,
        DownloadQuality::P480,
        DownloadQuality::P360,
        DownloadQuality::P240,
        DownloadQuality::P144,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadQuality::Best => "best",
            DownloadQuality::Worst => "worst",
            DownloadQuality::BestVideoAudio => "bv+ba",
            DownloadQuality::BestVideo => "bv",
            DownloadQuality::BestAudio => "ba",
            DownloadQuality::P1080 => "1080p",
            DownloadQuality::P720 => "720p",
            DownloadQuality::P480 => "480p",
            DownloadQuality::P360 => "360p",
            DownloadQuality::P240 => "240p",
            DownloadQuality::P144 => "144p",
        }
    }

    fn max_height(&self) -> Option<u32> {
        match self {
            DownloadQuality::P1080 => Some(1080),
            DownloadQuality::P720 => Some(720),
            DownloadQuality::P480 => Some(480),
            DownloadQuality::P360 => Some(360),
            DownloadQuality::P240 => Some(240),
            DownloadQuality::P144 => Some(144),
            _ => None,
        }
    }

    /// yt-dlp `-f` expression for this quality
    pub fn to_format_selector(&self) -> String {
        if let Some(h) = self.max_height() {
            return format!("bestvideo[height<={h}]+bestaudio/best[height<={h}]");
        }
        match self {
            DownloadQuality::Worst => "worst".to_string(),
            DownloadQuality::BestVideoAudio => "bv+ba/best".to_string(),
            DownloadQuality::BestVideo => "bv".to_string(),
            DownloadQuality::BestAudio => "ba".to_string(),
            _ => "best".to_string(),
        }
    }
}

impl fmt::Display for DownloadQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DownloadQuality::ALL
            .iter()
            .copied()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| format!("Unknown quality: {}", s))
    }
}

/// Whether a finished file is swept by cleanup or kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Temporary,
    Permanent,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Temporary => "temporary",
            StorageType::Permanent => "permanent",
        }
    }
}

impl FromStr for StorageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temporary" => Ok(StorageType::Temporary),
            "permanent" => Ok(StorageType::Permanent),
            other => Err(format!("Unknown storage type: {}", other)),
        }
    }
}

/// A single requested video download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Download {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub duration: Option<i64>,
    pub thumbnail: Option<String>,
    pub quality: DownloadQuality,
    pub status: DownloadStatus,
    pub progress: f64,
    pub file_path: Option<String>,
    pub file_size: Option<i64>,
    pub format: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempts: i64,
    pub error_message: Option<String>,
    pub downloads_count: i64,
    pub last_accessed: Option<DateTime<Utc>>,
    pub uploaded_to_drive: bool,
    pub drive_file_id: Option<String>,
    pub storage_type: StorageType,
}

impl Download {
    pub fn new(url: impl Into<String>, quality: DownloadQuality) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: None,
            url: url.into(),
            title: None,
            description: None,
            duration: None,
            thumbnail: None,
            quality,
            status: DownloadStatus::Pending,
            progress: 0.0,
            file_path: None,
            file_size: None,
            format: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            attempts: 0,
            error_message: None,
            downloads_count: 0,
            last_accessed: None,
            uploaded_to_drive: false,
            drive_file_id: None,
            storage_type: StorageType::Temporary,
        }
    }

    pub fn start(&mut self) {
        self.status = DownloadStatus::Downloading;
        self.started_at = Some(Utc::now());
        self.attempts += 1;
    }

    pub fn update_progress(&mut self, progress: f64) {
        self.progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 100.0)
        };
    }

    pub fn complete(&mut self, file_path: impl Into<String>, file_size: Option<i64>) {
        self.status = DownloadStatus::Completed;
        self.progress = 100.0;
        self.file_path = Some(file_path.into());
        self.file_size = file_size;
        self.completed_at = Some(Utc::now());
        self.error_message = None;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = DownloadStatus::Failed;
        self.error_message = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn cancel(&mut self) {
        self.status = DownloadStatus::Cancelled;
    }

    pub fn reset_for_retry(&mut self) {
        self.status = DownloadStatus::Pending;
        self.error_message = None;
        self.progress = 0.0;
        self.completed_at = None;
    }

    pub fn can_retry(&self) -> bool {
        matches!(self.status, DownloadStatus::Failed | DownloadStatus::Cancelled)
    }

    /// Completed more than `hours` ago
    pub fn is_expired(&self, hours: i64) -> bool {
        match (self.status, self.completed_at) {
            (DownloadStatus::Completed, Some(done)) => Utc::now() > done + Duration::hours(hours),
            _ => false,
        }
    }

    pub fn mark_accessed(&mut self) {
        self.downloads_count += 1;
        self.last_accessed = Some(Utc::now());
    }

    pub fn mark_uploaded(&mut self, drive_file_id: impl Into<String>) {
        self.status = DownloadStatus::UploadedToDrive;
        self.uploaded_to_drive = true;
        self.drive_file_id = Some(drive_file_id.into());
    }

    /// Seconds between start and completion
    pub fn elapsed_secs(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}
