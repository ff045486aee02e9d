//! Application configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Prefix every REST route is nested under
    pub api_prefix: String,

    pub project_name: String,

    /// HMAC secret for access tokens
    pub secret_key: String,

    /// SQLite connection string
    pub database_url: String,

    /// Public base URL used when building temporary links
    pub base_url: String,

    /// Where yt-dlp writes finished files
    pub videos_dir: PathBuf,
    pub permanent_dir: PathBuf,
    pub temporary_dir: PathBuf,
    /// Scratch space for in-flight processing
    pub temp_dir: PathBuf,

    /// Number of download workers
    pub max_concurrent_downloads: usize,

    /// Extra attempts after the first failure
    pub max_retries: u32,

    /// Upper bound for the exponential retry backoff (seconds)
    pub retry_backoff_max_secs: u64,

    /// Lifetime of temporary storage, in seconds
    pub temp_file_expiration_secs: u64,

    /// Relay completed files to cloud storage
    pub upload_to_drive: bool,
    pub relay_endpoint: Option<String>,

    pub rate_limit_per_minute: u32,
    pub rate_limit_per_hour: u32,

    /// Default access token lifetime, in seconds
    pub token_expiration_secs: u64,

    pub log_level: String,
    /// "json" or "pretty"
    pub log_format: String,

    pub alert_webhook_url: Option<String>,
    pub slack_webhook_url: Option<String>,
    pub discord_webhook_url: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,

    /// Seconds between metric collection rounds
    pub monitoring_interval_secs: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_prefix: "/api/v1".to_string(),
            project_name: "tubeload".to_string(),
            secret_key: String::new(),
            database_url: "sqlite://tubeload.db".to_string(),
            base_url: "http://localhost:8000".to_string(),
            videos_dir: PathBuf::from("videos"),
            permanent_dir: PathBuf::from("videos/permanent"),
            temporary_dir: PathBuf::from("videos/temporary"),
            temp_dir: PathBuf::from("videos/temp"),
            max_concurrent_downloads: 1,
            max_retries: 2,
            retry_backoff_max_secs: 300,
            temp_file_expiration_secs: 3600,
            upload_to_drive: false,
            relay_endpoint: None,
            rate_limit_per_minute: 60,
            rate_limit_per_hour: 1000,
            token_expiration_secs: 3600,
            log_level: "info".to_string(),
            log_format: "json".to_string(),
            alert_webhook_url: None,
            slack_webhook_url: None,
            discord_webhook_url: None,
            telegram_bot_token: None,
            telegram_chat_id: None,
            monitoring_interval_secs: 60,
        }
    }
}

const ENV_PREFIX: &str = "TUBELOAD_";

impl AppSettings {
    /// Load settings from `.env` and `TUBELOAD_*` environment variables
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                warn!("Failed to read .env file: {}", e);
            }
        }
        Self::from_lookup(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())
    }

    /// Load settings from an explicit env file, then the process environment
    pub fn from_env_file(path: &std::path::Path) -> anyhow::Result<Self> {
        dotenvy::from_path(path)?;
        Ok(Self::from_lookup(|key| {
            std::env::var(format!("{}{}", ENV_PREFIX, key)).ok()
        }))
    }

    /// Build settings from any key lookup. Keys are given without the prefix.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(v) = lookup("API_PREFIX") {
            settings.api_prefix = v;
        }
        if let Some(v) = lookup("PROJECT_NAME") {
            settings.project_name = v;
        }
        if let Some(v) = lookup("SECRET_KEY") {
            settings.secret_key = v;
        }
        if let Some(v) = lookup("DATABASE_URL") {
            settings.database_url = v;
        }
        if let Some(v) = lookup("BASE_URL") {
            settings.base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("VIDEOS_DIR") {
            settings.videos_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("PERMANENT_DIR") {
            settings.permanent_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("TEMPORARY_DIR") {
            settings.temporary_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("TEMP_DIR") {
            settings.temp_dir = PathBuf::from(v);
        }
        parse_into(&lookup, "MAX_CONCURRENT_DOWNLOADS", &mut settings.max_concurrent_downloads);
        parse_into(&lookup, "MAX_RETRIES", &mut settings.max_retries);
        parse_into(&lookup, "RETRY_BACKOFF_MAX", &mut settings.retry_backoff_max_secs);
        parse_into(&lookup, "TEMP_FILE_EXPIRATION", &mut settings.temp_file_expiration_secs);
        parse_into(&lookup, "UPLOAD_TO_DRIVE", &mut settings.upload_to_drive);
        settings.relay_endpoint = lookup("RELAY_ENDPOINT").or(settings.relay_endpoint);
        parse_into(&lookup, "RATE_LIMIT_PER_MINUTE", &mut settings.rate_limit_per_minute);
        parse_into(&lookup, "RATE_LIMIT_PER_HOUR", &mut settings.rate_limit_per_hour);
        parse_into(&lookup, "TOKEN_EXPIRATION", &mut settings.token_expiration_secs);
        if let Some(v) = lookup("LOG_LEVEL") {
            settings.log_level = v.to_lowercase();
        }
        if let Some(v) = lookup("LOG_FORMAT") {
            settings.log_format = v.to_lowercase();
        }
        settings.alert_webhook_url = lookup("ALERT_WEBHOOK_URL");
        settings.slack_webhook_url = lookup("SLACK_WEBHOOK_URL");
        settings.discord_webhook_url = lookup("DISCORD_WEBHOOK_URL");
        settings.telegram_bot_token = lookup("TELEGRAM_BOT_TOKEN");
        settings.telegram_chat_id = lookup("TELEGRAM_CHAT_ID");
        parse_into(&lookup, "MONITORING_INTERVAL", &mut settings.monitoring_interval_secs);

        settings
    }

    /// Enforce sane minimums and fill in a secret when none was configured
    pub fn validate(mut self) -> Self {
        if self.max_concurrent_downloads == 0 {
            self.max_concurrent_downloads = 1;
        }
        if self.monitoring_interval_secs < 10 {
            self.monitoring_interval_secs = 10;
        }
        if self.retry_backoff_max_secs == 0 {
            self.retry_backoff_max_secs = 1;
        }
        if self.secret_key.is_empty() {
            warn!("TUBELOAD_SECRET_KEY is not set; generating an ephemeral key (tokens will not survive restarts)");
            self.secret_key = crate::auth::password::random_hex(32);
        }
        if !self.api_prefix.starts_with('/') {
            self.api_prefix = format!("/{}", self.api_prefix);
        }
        self
    }

    pub fn json_logs(&self) -> bool {
        self.log_format == "json"
    }
}

fn parse_into<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => warn!("Ignoring invalid value for {}{}: {:?}", ENV_PREFIX, key, raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = AppSettings::default();
        assert_eq!(config.api_prefix, "/api/v1");
        assert_eq!(config.max_concurrent_downloads, 1);
        assert_eq!(config.temp_file_expiration_secs, 3600);
        assert_eq!(config.rate_limit_per_minute, 60);
        assert_eq!(config.rate_limit_per_hour, 1000);
        assert!(!config.upload_to_drive);
        assert!(config.json_logs());
    }

    #[test]
    fn test_lookup_overrides_defaults() {
        let config = AppSettings::from_lookup(lookup_from(&[
            ("MAX_CONCURRENT_DOWNLOADS", "4"),
            ("UPLOAD_TO_DRIVE", "true"),
            ("BASE_URL", "https://dl.example.com/"),
            ("LOG_FORMAT", "PRETTY"),
        ]));

        assert_eq!(config.max_concurrent_downloads, 4);
        assert!(config.upload_to_drive);
        assert_eq!(config.base_url, "https://dl.example.com");
        assert!(!config.json_logs());
    }

    #[test]
    fn test_invalid_numbers_keep_default() {
        let config = AppSettings::from_lookup(lookup_from(&[("RATE_LIMIT_PER_MINUTE", "lots")]));
        assert_eq!(config.rate_limit_per_minute, 60);
    }

    #[test]
    fn test_validate_enforces_minimums() {
        let mut config = AppSettings::default();
        config.max_concurrent_downloads = 0;
        config.monitoring_interval_secs = 1;
        config.api_prefix = "api".to_string();

        let config = config.validate();

        assert_eq!(config.max_concurrent_downloads, 1);
        assert_eq!(config.monitoring_interval_secs, 10);
        assert_eq!(config.api_prefix, "/api");
        assert_eq!(config.secret_key.len(), 64);
    }
}
