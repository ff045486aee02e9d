//! Relaying finished downloads to remote storage

use crate::database::DatabaseManager;
use crate::domain::{DownloadLog, DownloadStatus, GoogleDriveConfig, LogAction};
use crate::utils::TubeloadError;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use std::path::Path;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};
use uuid::Uuid;

type Result<T> = std::result::Result<T, TubeloadError>;

/// Remote storage target
#[async_trait]
pub trait CloudRelay: Send + Sync {
    /// Upload `path` and return the remote file id
    async fn upload(&self, path: &Path, config: &GoogleDriveConfig) -> Result<String>;
}

/// Streams the file with a single PUT to `{endpoint}/{folder}/{filename}`
pub struct HttpRelay {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRelay {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn upload_url(&self, file_name: &str, config: &GoogleDriveConfig) -> String {
        match config.folder_id.as_deref().filter(|f| !f.is_empty()) {
            Some(folder) => format!("{}/{}/{}", self.endpoint, folder, file_name),
            None => format!("{}/{}", self.endpoint, file_name),
        }
    }
}

#[async_trait]
impl CloudRelay for HttpRelay {
    async fn upload(&self, path: &Path, config: &GoogleDriveConfig) -> Result<String> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TubeloadError::RelayError("file has no name".into()))?;
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        let mime = mime_guess::from_path(path).first_or_octet_stream();

        let mut request = self
            .client
            .put(self.upload_url(&file_name, config))
            .header(CONTENT_TYPE, mime.as_ref())
            .header(CONTENT_LENGTH, len)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)));
        if let Some(token) = config.access_token() {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TubeloadError::RelayError(format!("upload returned {}: {}", status, body)));
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);
        body.get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or(location)
            .ok_or_else(|| TubeloadError::RelayError("upload response carried no file id".into()))
    }
}

pub struct RelayService {
    db: DatabaseManager,
    relay: Arc<dyn CloudRelay>,
}

impl RelayService {
    pub fn new(db: DatabaseManager, relay: Arc<dyn CloudRelay>) -> Self {
        Self { db, relay }
    }

    async fn pick_config(&self, user_id: Option<Uuid>) -> Result<Option<GoogleDriveConfig>> {
        if let Some(user_id) = user_id {
            if let Some(config) = self.db.get_drive_config_for_user(user_id).await? {
                return Ok(Some(config));
            }
        }
        Ok(self.db.get_default_drive_config().await?)
    }

    /// Upload a completed download and record the remote id
    pub async fn relay(&self, download_id: Uuid) -> Result<String> {
        let mut download = self
            .db
            .get_download(download_id)
            .await?
            .ok_or_else(|| TubeloadError::not_found("Download not found"))?;
        let path = match (&download.file_path, download.status) {
            (Some(path), DownloadStatus::Completed) => path.clone(),
            _ => {
                return Err(TubeloadError::Validation(
                    "Only completed downloads can be uploaded".into(),
                ))
            }
        };
        let mut config = self
            .pick_config(download.user_id)
            .await?
            .ok_or_else(|| TubeloadError::not_found("No relay configuration available"))?;

        if !config.is_valid() {
            return Err(TubeloadError::Validation("Relay configuration is not active".into()));
        }
        let size = download.file_size.unwrap_or(0);
        if !config.has_quota_available(size) {
            return Err(TubeloadError::Validation("Relay quota exceeded".into()));
        }

        download.status = DownloadStatus::UploadingToDrive;
        self.db.update_download(&download).await?;
        config.start_sync();
        self.db.update_drive_config(&config).await?;

        let mut log = DownloadLog::new(
            LogAction::UploadToDrive,
            &download.url,
            download.title.clone().unwrap_or_default(),
            "uploading",
        )
        .for_download(download.id);
        log.user_id = download.user_id;
        log.start_time = Some(chrono::Utc::now());

        match self.relay.upload(Path::new(&path), &config).await {
            Ok(remote_id) => {
                download.mark_uploaded(&remote_id);
                self.db.update_download(&download).await?;
                config.complete_sync();
                config.update_quota(config.quota_used + size, None);
                self.db.update_drive_config(&config).await?;

                log.status = "completed".to_string();
                log.end_time = Some(chrono::Utc::now());
                log.file_size_downloaded = download.file_size;
                log.calculate_duration();
                log.calculate_speed();
                self.write_log(&log).await;

                info!("Relayed download {} as {}", download.id, remote_id);
                Ok(remote_id)
            }
            Err(e) => {
                error!("Relay of download {} failed: {}", download.id, e);
                download.status = DownloadStatus::Completed;
                self.db.update_download(&download).await?;
                config.mark_error(e.to_string());
                self.db.update_drive_config(&config).await?;

                log.status = "failed".to_string();
                log.error_message = Some(e.to_string());
                self.write_log(&log).await;
                Err(e)
            }
        }
    }

    async fn write_log(&self, log: &DownloadLog) {
        if let Err(e) = self.db.create_log(log).await {
            warn!("Failed to write upload log: {}", e);
        }
    }
}
