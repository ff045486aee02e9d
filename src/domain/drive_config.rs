//! Cloud relay target configuration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DriveStatus {
    #[default]
    Active,
    Inactive,
    Error,
    Syncing,
}

impl DriveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriveStatus::Active => "active",
            DriveStatus::Inactive => "inactive",
            DriveStatus::Error => "error",
            DriveStatus::Syncing => "syncing",
        }
    }
}

impl FromStr for DriveStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(DriveStatus::Active),
            "inactive" => Ok(DriveStatus::Inactive),
            "error" => Ok(DriveStatus::Error),
            "syncing" => Ok(DriveStatus::Syncing),
            other => Err(format!("Unknown drive status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoogleDriveConfig {
    pub id: Uuid,
    pub user_id: Uuid,
    pub credentials: serde_json::Value,
    pub folder_id: Option<String>,
    pub custom_key: Option<String>,
    pub status: DriveStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_sync: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub quota_used: i64,
    pub quota_limit: Option<i64>,
    pub is_default: bool,
}

impl GoogleDriveConfig {
    pub fn new(user_id: Uuid, credentials: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            credentials,
            folder_id: None,
            custom_key: None,
            status: DriveStatus::Active,
            created_at: now,
            updated_at: now,
            last_sync: None,
            error_message: None,
            quota_used: 0,
            quota_limit: None,
            is_default: false,
        }
    }

    pub fn activate(&mut self) {
        self.status = DriveStatus::Active;
        self.error_message = None;
        self.updated_at = Utc::now();
    }

    pub fn deactivate(&mut self) {
        self.status = DriveStatus::Inactive;
        self.updated_at = Utc::now();
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = DriveStatus::Error;
        self.error_message = Some(message.into());
        self.updated_at = Utc::now();
    }

    pub fn start_sync(&mut self) {
        self.status = DriveStatus::Syncing;
        self.updated_at = Utc::now();
    }

    pub fn complete_sync(&mut self) {
        let now = Utc::now();
        self.status = DriveStatus::Active;
        self.last_sync = Some(now);
        self.updated_at = now;
    }

    pub fn update_quota(&mut self, used: i64, limit: Option<i64>) {
        self.quota_used = used;
        if limit.is_some() {
            self.quota_limit = limit;
        }
        self.updated_at = Utc::now();
    }

    /// Unlimited when no quota limit is known
    pub fn has_quota_available(&self, required: i64) -> bool {
        match self.quota_limit {
            Some(limit) => self.quota_used + required <= limit,
            None => true,
        }
    }

    pub fn quota_percentage(&self) -> f64 {
        match self.quota_limit {
            Some(limit) if limit > 0 => self.quota_used as f64 / limit as f64 * 100.0,
            _ => 0.0,
        }
    }

    pub fn is_valid(&self) -> bool {
        let has_credentials = match &self.credentials {
            serde_json::Value::Null => false,
            serde_json::Value::Object(map) => !map.is_empty(),
            serde_json::Value::String(s) => !s.is_empty(),
            _ => true,
        };
        self.status == DriveStatus::Active && has_credentials
    }

    /// Bearer token carried in the credentials, if any
    pub fn access_token(&self) -> Option<&str> {
        self.credentials.get("access_token").and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validity_requires_active_and_credentials() {
        let mut c = GoogleDriveConfig::new(Uuid::new_v4(), json!({"access_token": "t"}));
        assert!(c.is_valid());
        assert_eq!(c.access_token(), Some("t"));

        c.mark_error("boom");
        assert!(!c.is_valid());
        c.activate();
        assert!(c.is_valid());
        assert!(c.error_message.is_none());

        let empty = GoogleDriveConfig::new(Uuid::new_v4(), json!({}));
        assert!(!empty.is_valid());
    }

    #[test]
    fn test_quota() {
        let mut c = GoogleDriveConfig::new(Uuid::new_v4(), json!({"k": "v"}));
        assert!(c.has_quota_available(i64::MAX / 2));
        assert_eq!(c.quota_percentage(), 0.0);

        c.update_quota(750, Some(1000));
        assert!(c.has_quota_available(250));
        assert!(!c.has_quota_available(251));
        assert_eq!(c.quota_percentage(), 75.0);
    }

    #[test]
    fn test_sync_cycle() {
        let mut c = GoogleDriveConfig::new(Uuid::new_v4(), json!({"k": "v"}));
        c.start_sync();
        assert_eq!(c.status, DriveStatus::Syncing);
        c.complete_sync();
        assert_eq!(c.status, DriveStatus::Active);
        assert!(c.last_sync.is_some());
    }
}
