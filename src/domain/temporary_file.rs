//! Time-limited access links to stored files

use crate::utils::TubeloadError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporaryFile {
    pub id: Uuid,
    pub download_id: Uuid,
    pub file_path: String,
    pub token: String,
    pub expiration_time: DateTime<Utc>,
    pub access_count: i64,
    pub max_accesses: Option<i64>,
    pub temporary_url: String,
    pub file_hash: String,
    pub custom_filename: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: Option<DateTime<Utc>>,
}

impl TemporaryFile {
    /// New link valid for `hours` from now
    pub fn new(
        download_id: Uuid,
        file_path: impl Into<String>,
        token: impl Into<String>,
        hours: i64,
        temporary_url: impl Into<String>,
        file_hash: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            download_id,
            file_path: file_path.into(),
            token: token.into(),
            expiration_time: now + Duration::hours(hours),
            access_count: 0,
            max_accesses: None,
            temporary_url: temporary_url.into(),
            file_hash: file_hash.into(),
            custom_filename: None,
            created_at: now,
            last_accessed: None,
        }
    }

    /// `{base}{prefix}/downloads/{id}/temp/{token}`
    pub fn build_url(base_url: &str, api_prefix: &str, download_id: Uuid, token: &str) -> String {
        format!(
            "{}{}/downloads/{}/temp/{}",
            base_url.trim_end_matches('/'),
            api_prefix,
            download_id,
            token
        )
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expiration_time
    }

    pub fn is_access_limit_reached(&self) -> bool {
        self.max_accesses
            .is_some_and(|max| self.access_count >= max)
    }

    pub fn can_be_accessed(&self) -> bool {
        !self.is_expired() && !self.is_access_limit_reached()
    }

    pub fn increment_access(&mut self) -> Result<(), TubeloadError> {
        if self.is_expired() {
            return Err(TubeloadError::Expired("Temporary URL has expired".into()));
        }
        if self.is_access_limit_reached() {
            return Err(TubeloadError::AccessDenied(
                "Access limit reached for this URL".into(),
            ));
        }
        self.access_count += 1;
        self.last_accessed = Some(Utc::now());
        Ok(())
    }

    pub fn extend(&mut self, hours: i64) -> Result<(), TubeloadError> {
        if self.is_expired() {
            return Err(TubeloadError::Expired(
                "Cannot extend an expired temporary URL".into(),
            ));
        }
        self.expiration_time += Duration::hours(hours);
        Ok(())
    }

    /// Seconds left before expiry, zero once expired
    pub fn remaining_secs(&self) -> i64 {
        (self.expiration_time - Utc::now()).num_seconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link() -> TemporaryFile {
        TemporaryFile::new(Uuid::new_v4(), "/videos/a.mp4", "tok", 1, "http://x/tok", "abc")
    }

    #[test]
    fn test_fresh_link_is_accessible() {
        let t = link();
        assert!(!t.is_expired());
        assert!(t.can_be_accessed());
        assert!(t.remaining_secs() > 3500);
    }

    #[test]
    fn test_access_limit() {
        let mut t = link();
        t.max_accesses = Some(2);
        t.increment_access().unwrap();
        t.increment_access().unwrap();
        assert!(t.is_access_limit_reached());
        assert!(matches!(t.increment_access(), Err(TubeloadError::AccessDenied(_))));
        assert_eq!(t.access_count, 2);
    }

    #[test]
    fn test_expired_link() {
        let mut t = link();
        t.expiration_time = Utc::now() - Duration::seconds(1);
        assert!(!t.can_be_accessed());
        assert!(matches!(t.increment_access(), Err(TubeloadError::Expired(_))));
        assert!(matches!(t.extend(1), Err(TubeloadError::Expired(_))));
        assert_eq!(t.remaining_secs(), 0);
    }

    #[test]
    fn test_extend_adds_to_current_expiry() {
        let mut t = link();
        let before = t.expiration_time;
        t.extend(3).unwrap();
        assert_eq!(t.expiration_time - before, Duration::hours(3));
    }

    #[test]
    fn test_build_url() {
        let id = Uuid::nil();
        assert_eq!(
            TemporaryFile::build_url("http://localhost:8000/", "/api/v1", id, "abc"),
            format!("http://localhost:8000/api/v1/downloads/{}/temp/abc", id)
        );
    }
}
