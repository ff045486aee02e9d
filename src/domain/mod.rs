//! Core records persisted by the service

pub mod download;
pub mod download_log;
pub mod drive_config;
pub mod temporary_file;
pub mod user;

pub use download::{Download, DownloadQuality, DownloadStatus, StorageType};
pub use download_log::{DownloadLog, LogAction};
pub use drive_config::{DriveStatus, GoogleDriveConfig};
pub use temporary_file::TemporaryFile;
pub use user::{User, UserRole};
