//! On-disk layout of downloaded files

use crate::domain::StorageType;
use crate::utils::AppSettings;
use path_absolutize::Absolutize;
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};
use walkdir::WalkDir;

const HASH_CHUNK: usize = 4096;

#[derive(Debug, Clone)]
pub struct FileStorage {
    videos_dir: PathBuf,
    permanent_dir: PathBuf,
    temporary_dir: PathBuf,
    temp_dir: PathBuf,
}

fn absolute(path: &Path) -> PathBuf {
    path.absolutize()
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| path.to_path_buf())
}

impl FileStorage {
    pub fn new(settings: &AppSettings) -> Self {
        Self {
            videos_dir: absolute(&settings.videos_dir),
            permanent_dir: absolute(&settings.permanent_dir),
            temporary_dir: absolute(&settings.temporary_dir),
            temp_dir: absolute(&settings.temp_dir),
        }
    }

    pub fn videos_dir(&self) -> &Path {
        &self.videos_dir
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn dir_for(&self, storage_type: StorageType) -> &Path {
        match storage_type {
            StorageType::Permanent => &self.permanent_dir,
            StorageType::Temporary => &self.temporary_dir,
        }
    }

    pub async fn ensure_dirs(&self) -> io::Result<()> {
        for dir in [&self.videos_dir, &self.permanent_dir, &self.temporary_dir, &self.temp_dir] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    /// Move `path` into the directory for `storage_type`, returning the new location
    pub async fn promote(&self, path: &Path, storage_type: StorageType) -> io::Result<PathBuf> {
        let target_dir = self.dir_for(storage_type);
        if path.parent() == Some(target_dir) {
            return Ok(path.to_path_buf());
        }
        let file_name = path
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
        tokio::fs::create_dir_all(target_dir).await?;
        let target = target_dir.join(file_name);

        if tokio::fs::rename(path, &target).await.is_err() {
            // Rename fails across filesystems
            tokio::fs::copy(path, &target).await?;
            tokio::fs::remove_file(path).await?;
        }
        debug!("Moved {} to {}", path.display(), target.display());
        Ok(target)
    }

    /// SHA-256 of the file contents, hex encoded
    pub async fn file_hash(path: &Path) -> io::Result<String> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; HASH_CHUNK];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Returns true when a file was removed
    pub async fn remove_file_if_exists(path: &Path) -> io::Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Total size of every file under `dir`
    pub fn disk_usage_bytes(dir: &Path) -> u64 {
        WalkDir::new(dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    /// Share of the filesystem holding `dir` that is in use, as a percentage
    pub fn filesystem_usage_percent(dir: &Path) -> std::io::Result<f64> {
        let total = fs2::total_space(dir)?;
        if total == 0 {
            return Ok(0.0);
        }
        let available = fs2::available_space(dir)?;
        Ok(total.saturating_sub(available) as f64 / total as f64 * 100.0)
    }

    /// Direct children of `dir` not modified within `older_than`
    pub fn stale_entries(dir: &Path, older_than: Duration) -> Vec<PathBuf> {
        let Some(cutoff) = SystemTime::now().checked_sub(older_than) else {
            return Vec::new();
        };
        WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| modified_before(e.path(), cutoff))
            .map(|e| e.into_path())
            .collect()
    }

    /// Every file under `dir`, at any depth, not modified within `older_than`
    pub fn stale_files(dir: &Path, older_than: Duration) -> Vec<PathBuf> {
        let Some(cutoff) = SystemTime::now().checked_sub(older_than) else {
            return Vec::new();
        };
        WalkDir::new(dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file() && modified_before(e.path(), cutoff))
            .map(|e| e.into_path())
            .collect()
    }

    /// Remove a file or a whole directory tree
    pub async fn remove_entry(path: &Path) -> io::Result<()> {
        let meta = tokio::fs::symlink_metadata(path).await?;
        if meta.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        }
    }
}

fn modified_before(path: &Path, cutoff: SystemTime) -> bool {
    match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => modified < cutoff,
        Err(e) => {
            warn!("Cannot read mtime of {}: {}", path.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(root: &Path) -> FileStorage {
        let mut settings = AppSettings::default();
        settings.videos_dir = root.to_path_buf();
        settings.permanent_dir = root.join("permanent");
        settings.temporary_dir = root.join("temporary");
        settings.temp_dir = root.join("temp");
        FileStorage::new(&settings)
    }

    #[tokio::test]
    async fn test_promote_moves_file() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let storage = storage(dir.path());
        storage.ensure_dirs().await.unwrap();

        let src = dir.path().join("clip.mp4");
        tokio::fs::write(&src, b"video").await.unwrap();

        let moved = storage.promote(&src, StorageType::Permanent).await.unwrap();
        assert_eq!(moved, dir.path().join("permanent").join("clip.mp4"));
        assert!(moved.exists());
        assert!(!src.exists());

        // Already in place
        let same = storage.promote(&moved, StorageType::Permanent).await.unwrap();
        assert_eq!(same, moved);
    }

    #[tokio::test]
    async fn test_file_hash_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.txt");
        tokio::fs::write(&path, b"abc").await.unwrap();
        assert_eq!(
            FileStorage::file_hash(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_remove_and_usage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        tokio::fs::write(&path, vec![0u8; 100]).await.unwrap();
        tokio::fs::create_dir_all(dir.path().join("nested")).await.unwrap();
        tokio::fs::write(dir.path().join("nested/b.bin"), vec![0u8; 50]).await.unwrap();

        assert_eq!(FileStorage::disk_usage_bytes(dir.path()), 150);
        assert!(FileStorage::remove_file_if_exists(&path).await.unwrap());
        assert!(!FileStorage::remove_file_if_exists(&path).await.unwrap());
        assert_eq!(FileStorage::disk_usage_bytes(dir.path()), 50);
    }

    #[test]
    fn test_filesystem_usage_percent() {
        let dir = tempfile::tempdir().unwrap();
        let used = FileStorage::filesystem_usage_percent(dir.path()).unwrap();
        assert!((0.0..=100.0).contains(&used));
        assert!(FileStorage::filesystem_usage_percent(&dir.path().join("missing")).is_err());
    }

    #[tokio::test]
    async fn test_stale_entries() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("fresh.part"), b"x").await.unwrap();

        assert!(FileStorage::stale_entries(dir.path(), Duration::from_secs(3600)).is_empty());
        // Everything is older than "zero seconds ago" once a moment has passed
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(FileStorage::stale_entries(dir.path(), Duration::ZERO).len(), 1);
        assert_eq!(FileStorage::stale_files(dir.path(), Duration::ZERO).len(), 1);
    }
}
