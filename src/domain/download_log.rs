//! Audit log of download and account activity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    DownloadStarted,
    DownloadProgress,
    DownloadCompleted,
    DownloadFailed,
    DownloadCancelled,
    UploadToDrive,
    CreateTempUrl,
    AccessTempUrl,
    UserLogin,
    UserLogout,
    SystemError,
}

impl LogAction {
    pub const ALL: [LogAction; 11] = [
        LogAction::DownloadStarted,
        LogAction::DownloadProgress,
        LogAction::DownloadCompleted,
        LogAction::DownloadFailed,
        LogAction::DownloadCancelled,
        LogAction::UploadToDrive,
        LogAction::CreateTempUrl,
        LogAction::AccessTempUrl,
        LogAction::UserLogin,
        LogAction::UserLogout,
        LogAction::SystemError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogAction::DownloadStarted => "download_started",
            LogAction::DownloadProgress => "download_progress",
            LogAction::DownloadCompleted => "download_completed",
            LogAction::DownloadFailed => "download_failed",
            LogAction::DownloadCancelled => "download_cancelled",
            LogAction::UploadToDrive => "upload_to_drive",
            LogAction::CreateTempUrl => "create_temp_url",
            LogAction::AccessTempUrl => "access_temp_url",
            LogAction::UserLogin => "user_login",
            LogAction::UserLogout => "user_logout",
            LogAction::SystemError => "system_error",
        }
    }
}

impl fmt::Display for LogAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogAction::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("Unknown log action: {}", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadLog {
    pub id: Uuid,
    pub download_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub action: LogAction,
    pub video_url: String,
    pub video_title: String,
    pub video_format: Option<String>,
    pub video_quality: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Seconds
    pub download_duration: Option<f64>,
    /// MB/s
    pub download_speed: Option<f64>,
    pub file_size_downloaded: Option<i64>,
    pub progress_percentage: Option<f64>,
    pub status: String,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DownloadLog {
    pub fn new(
        action: LogAction,
        video_url: impl Into<String>,
        video_title: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            download_id: None,
            user_id: None,
            action,
            video_url: video_url.into(),
            video_title: video_title.into(),
            video_format: None,
            video_quality: None,
            start_time: None,
            end_time: None,
            download_duration: None,
            download_speed: None,
            file_size_downloaded: None,
            progress_percentage: None,
            status: status.into(),
            error_message: None,
            retry_count: 0,
            ip_address: None,
            user_agent: None,
            created_at: Utc::now(),
        }
    }

    pub fn for_download(mut self, download_id: Uuid) -> Self {
        self.download_id = Some(download_id);
        self
    }

    pub fn for_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    /// Seconds between start and end, stored on the log
    pub fn calculate_duration(&mut self) -> Option<f64> {
        let duration = match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        };
        if duration.is_some() {
            self.download_duration = duration;
        }
        duration
    }

    /// MB/s from the downloaded size and the duration
    pub fn calculate_speed(&mut self) -> Option<f64> {
        let speed = match (self.file_size_downloaded, self.download_duration) {
            (Some(bytes), Some(secs)) if secs > 0.0 => {
                Some(bytes as f64 / (1024.0 * 1024.0 * secs))
            }
            _ => None,
        };
        if speed.is_some() {
            self.download_speed = speed;
        }
        speed
    }

    pub fn is_successful(&self) -> bool {
        self.status == "completed" && self.error_message.is_none()
    }

    pub fn has_error(&self) -> bool {
        self.error_message.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_duration_and_speed() {
        let mut log = DownloadLog::new(LogAction::DownloadCompleted, "u", "t", "completed");
        let start = Utc::now();
        log.start_time = Some(start);
        log.end_time = Some(start + Duration::seconds(4));
        log.file_size_downloaded = Some(8 * 1024 * 1024);

        assert_eq!(log.calculate_duration(), Some(4.0));
        assert_eq!(log.calculate_speed(), Some(2.0));
        assert!(log.is_successful());
    }

    #[test]
    fn test_speed_needs_duration() {
        let mut log = DownloadLog::new(LogAction::DownloadCompleted, "u", "t", "completed");
        log.file_size_downloaded = Some(100);
        assert_eq!(log.calculate_speed(), None);
    }

    #[test]
    fn test_error_flags() {
        let log = DownloadLog::new(LogAction::DownloadFailed, "u", "t", "failed").with_error("x");
        assert!(log.has_error());
        assert!(!log.is_successful());
    }

    #[test]
    fn test_action_strings() {
        for action in LogAction::ALL {
            assert_eq!(action.as_str().parse::<LogAction>(), Ok(action));
        }
    }
}
