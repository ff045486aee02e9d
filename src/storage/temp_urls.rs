//! Expiring access links to stored files

use super::files::FileStorage;
use crate::database::DatabaseManager;
use crate::domain::{DownloadLog, LogAction, TemporaryFile};
use crate::utils::TubeloadError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

type Result<T> = std::result::Result<T, TubeloadError>;

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TempUrlInfo {
    pub download_id: Uuid,
    pub expiration_time: DateTime<Utc>,
    pub access_count: i64,
    pub max_accesses: Option<i64>,
    pub is_expired: bool,
    pub is_access_limit_reached: bool,
    pub file_exists: bool,
    pub custom_filename: Option<String>,
}

/// Per-link summary used for access reporting
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TempUrlAccess {
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expiration_time: DateTime<Utc>,
    pub access_count: i64,
    pub max_accesses: Option<i64>,
    pub last_accessed: Option<DateTime<Utc>>,
    pub is_expired: bool,
}

pub struct TemporaryUrlService {
    db: DatabaseManager,
    base_url: String,
    api_prefix: String,
}

pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

impl TemporaryUrlService {
    pub fn new(db: DatabaseManager, base_url: impl Into<String>, api_prefix: impl Into<String>) -> Self {
        Self {
            db,
            base_url: base_url.into(),
            api_prefix: api_prefix.into(),
        }
    }

    pub async fn generate(
        &self,
        download_id: Uuid,
        file_path: &Path,
        hours: i64,
        max_accesses: Option<i64>,
        custom_filename: Option<String>,
    ) -> Result<TemporaryFile> {
        if !tokio::fs::try_exists(file_path).await.unwrap_or(false) {
            return Err(TubeloadError::not_found(format!(
                "File not found: {}",
                file_path.display()
            )));
        }
        if hours <= 0 {
            return Err(TubeloadError::Validation("Expiration must be at least one hour".into()));
        }

        let token = generate_token();
        let url = TemporaryFile::build_url(&self.base_url, &self.api_prefix, download_id, &token);
        let hash = FileStorage::file_hash(file_path).await?;

        let mut temp = TemporaryFile::new(
            download_id,
            file_path.to_string_lossy(),
            token,
            hours,
            url,
            hash,
        );
        temp.max_accesses = max_accesses;
        temp.custom_filename = custom_filename;
        self.db.create_temp_file(&temp).await?;

        self.write_log(
            DownloadLog::new(LogAction::CreateTempUrl, &temp.temporary_url, "", "completed")
                .for_download(download_id),
        )
        .await;
        info!("Created temporary URL for download {} (expires {})", download_id, temp.expiration_time);
        Ok(temp)
    }

    async fn load(&self, download_id: Uuid, token: &str) -> Result<TemporaryFile> {
        self.db
            .get_temp_file_by_token(download_id, token)
            .await?
            .ok_or_else(|| TubeloadError::not_found("Temporary URL not found"))
    }

    /// Check a link and count one access
    pub async fn validate(&self, download_id: Uuid, token: &str) -> Result<TemporaryFile> {
        let mut temp = self.load(download_id, token).await?;

        if temp.is_expired() {
            return Err(TubeloadError::Expired("Temporary URL has expired".into()));
        }
        if temp.is_access_limit_reached() {
            return Err(TubeloadError::AccessDenied("Access limit reached for this URL".into()));
        }
        if !tokio::fs::try_exists(&temp.file_path).await.unwrap_or(false) {
            return Err(TubeloadError::not_found("File no longer exists on the server"));
        }

        let now = Utc::now();
        match self.db.record_temp_file_access(temp.id, now).await? {
            Some(count) => {
                temp.access_count = count;
                temp.last_accessed = Some(now);
            }
            // Lost a race with another request for the last access or the expiry
            None if temp.expiration_time <= now => {
                return Err(TubeloadError::Expired("Temporary URL has expired".into()));
            }
            None => {
                return Err(TubeloadError::AccessDenied("Access limit reached for this URL".into()));
            }
        }
        self.write_log(
            DownloadLog::new(LogAction::AccessTempUrl, &temp.temporary_url, "", "completed")
                .for_download(download_id),
        )
        .await;
        Ok(temp)
    }

    /// Link state without counting an access
    pub async fn info(&self, download_id: Uuid, token: &str) -> Result<TempUrlInfo> {
        let temp = self.load(download_id, token).await?;
        Ok(TempUrlInfo {
            download_id: temp.download_id,
            expiration_time: temp.expiration_time,
            access_count: temp.access_count,
            max_accesses: temp.max_accesses,
            is_expired: temp.is_expired(),
            is_access_limit_reached: temp.is_access_limit_reached(),
            file_exists: tokio::fs::try_exists(&temp.file_path).await.unwrap_or(false),
            custom_filename: temp.custom_filename,
        })
    }

    pub async fn extend(&self, download_id: Uuid, token: &str, hours: i64) -> Result<TemporaryFile> {
        let mut temp = self.load(download_id, token).await?;
        temp.extend(hours)?;
        self.db.update_temp_file(&temp).await?;
        info!("Extended temporary URL {} by {}h", temp.id, hours);
        Ok(temp)
    }

    pub async fn revoke(&self, download_id: Uuid, token: &str) -> Result<bool> {
        match self.db.get_temp_file_by_token(download_id, token).await? {
            Some(temp) => Ok(self.db.delete_temp_file(temp.id).await?),
            None => Ok(false),
        }
    }

    /// Newest first
    pub async fn access_logs(&self, download_id: Uuid, limit: usize) -> Result<Vec<TempUrlAccess>> {
        let links = self.db.get_temp_files_for_download(download_id).await?;
        Ok(links
            .into_iter()
            .take(limit)
            .map(|t| TempUrlAccess {
                is_expired: t.is_expired(),
                token: t.token,
                created_at: t.created_at,
                expiration_time: t.expiration_time,
                access_count: t.access_count,
                max_accesses: t.max_accesses,
                last_accessed: t.last_accessed,
            })
            .collect())
    }

    /// Delete expired links together with their files
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let expired = self.db.get_expired_temp_files().await?;
        let mut cleaned = 0;
        for temp in expired {
            if let Err(e) = FileStorage::remove_file_if_exists(Path::new(&temp.file_path)).await {
                warn!("Failed to remove {}: {}", temp.file_path, e);
            }
            match self.db.delete_temp_file(temp.id).await {
                Ok(_) => cleaned += 1,
                Err(e) => warn!("Failed to delete temporary URL {}: {}", temp.id, e),
            }
        }
        info!("Temporary URL cleanup removed {} links", cleaned);
        Ok(cleaned)
    }

    async fn write_log(&self, log: DownloadLog) {
        if let Err(e) = self.db.create_log(&log).await {
            warn!("Failed to write {} log: {}", log.action, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::initialize_database;
    use crate::domain::{Download, DownloadQuality};
    use chrono::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        db: DatabaseManager,
        service: TemporaryUrlService,
        download: Download,
        file: std::path::PathBuf,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db = DatabaseManager::new(initialize_database("sqlite::memory:").await.unwrap());
        let download = Download::new("https://example.com/v", DownloadQuality::Best);
        db.create_download(&download).await.unwrap();
        let file = dir.path().join("clip.mp4");
        tokio::fs::write(&file, b"video bytes").await.unwrap();
        let service = TemporaryUrlService::new(db.clone(), "http://localhost:8000", "/api/v1");
        Fixture {
            _dir: dir,
            db,
            service,
            download,
            file,
        }
    }

    #[test]
    fn test_token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), 43);
        assert!(!token.contains('='));
        assert_ne!(token, generate_token());
    }

    #[tokio::test]
    async fn test_generate_and_validate() {
        let f = fixture().await;
        let temp = f
            .service
            .generate(f.download.id, &f.file, 1, Some(1), Some("nice.mp4".into()))
            .await
            .unwrap();
        assert!(temp.temporary_url.starts_with("http://localhost:8000/api/v1/downloads/"));
        assert_eq!(temp.file_hash.len(), 64);

        let used = f.service.validate(f.download.id, &temp.token).await.unwrap();
        assert_eq!(used.access_count, 1);

        assert!(matches!(
            f.service.validate(f.download.id, &temp.token).await,
            Err(TubeloadError::AccessDenied(_))
        ));
        assert!(matches!(
            f.service.validate(f.download.id, "nope").await,
            Err(TubeloadError::NotFound(_))
        ));

        let info = f.service.info(f.download.id, &temp.token).await.unwrap();
        assert!(info.is_access_limit_reached);
        assert!(info.file_exists);
        assert_eq!(info.access_count, 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_rejected() {
        let f = fixture().await;
        let missing = f.file.with_file_name("gone.mp4");
        assert!(matches!(
            f.service.generate(f.download.id, &missing, 1, None, None).await,
            Err(TubeloadError::NotFound(_))
        ));

        let temp = f.service.generate(f.download.id, &f.file, 1, None, None).await.unwrap();
        tokio::fs::remove_file(&f.file).await.unwrap();
        assert!(matches!(
            f.service.validate(f.download.id, &temp.token).await,
            Err(TubeloadError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_link_and_cleanup() {
        let f = fixture().await;
        let mut temp = f.service.generate(f.download.id, &f.file, 1, None, None).await.unwrap();
        temp.expiration_time = Utc::now() - Duration::minutes(1);
        f.db.update_temp_file(&temp).await.unwrap();

        assert!(matches!(
            f.service.validate(f.download.id, &temp.token).await,
            Err(TubeloadError::Expired(_))
        ));
        assert!(matches!(
            f.service.extend(f.download.id, &temp.token, 2).await,
            Err(TubeloadError::Expired(_))
        ));

        assert_eq!(f.service.cleanup_expired().await.unwrap(), 1);
        assert!(!f.file.exists());
        assert!(f.service.access_logs(f.download.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_extend_and_revoke() {
        let f = fixture().await;
        let temp = f.service.generate(f.download.id, &f.file, 1, None, None).await.unwrap();
        let extended = f.service.extend(f.download.id, &temp.token, 5).await.unwrap();
        assert!(extended.expiration_time > temp.expiration_time);

        assert_eq!(f.service.access_logs(f.download.id, 10).await.unwrap().len(), 1);
        assert!(f.service.revoke(f.download.id, &temp.token).await.unwrap());
        assert!(!f.service.revoke(f.download.id, &temp.token).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_use_link_admits_one_concurrent_request() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let url = format!("sqlite://{}", dir.path().join("links.db").display());
        let db = DatabaseManager::new(initialize_database(&url).await.unwrap());
        let download = Download::new("https://example.com/v", DownloadQuality::Best);
        db.create_download(&download).await.unwrap();
        let file = dir.path().join("clip.mp4");
        tokio::fs::write(&file, b"video bytes").await.unwrap();

        let service = std::sync::Arc::new(TemporaryUrlService::new(
            db.clone(),
            "http://localhost:8000",
            "/api/v1",
        ));
        let temp = service.generate(download.id, &file, 1, Some(1), None).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            let token = temp.token.clone();
            let id = download.id;
            handles.push(tokio::spawn(async move { service.validate(id, &token).await }));
        }

        let mut admitted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(e) => assert!(matches!(e, TubeloadError::AccessDenied(_)), "unexpected {e:?}"),
            }
        }
        assert_eq!(admitted, 1);

        let info = service.info(download.id, &temp.token).await.unwrap();
        assert_eq!(info.access_count, 1);
    }
}

