//! Alert fan-out to notification channels

use super::metrics::{Alert, AlertHandler, AlertSeverity};
use crate::utils::{AppSettings, TubeloadError};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

const SERVICE_NAME: &str = "tubeload";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    Webhook,
    Slack,
    Discord,
    Telegram,
    Console,
    Log,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Webhook => "webhook",
            NotificationChannel::Slack => "slack",
            NotificationChannel::Discord => "discord",
            NotificationChannel::Telegram => "telegram",
            NotificationChannel::Console => "console",
            NotificationChannel::Log => "log",
        }
    }
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationChannel {
    type Err = TubeloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "webhook" => Ok(NotificationChannel::Webhook),
            "slack" => Ok(NotificationChannel::Slack),
            "discord" => Ok(NotificationChannel::Discord),
            "telegram" => Ok(NotificationChannel::Telegram),
            "console" => Ok(NotificationChannel::Console),
            "log" => Ok(NotificationChannel::Log),
            other => Err(TubeloadError::Validation(format!(
                "Unknown notification channel: {}",
                other
            ))),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_rate_limit() -> i64 {
    5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub channel: NotificationChannel,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub severity_filter: Option<Vec<AlertSeverity>>,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_minutes: i64,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
}

impl NotificationConfig {
    pub fn new(channel: NotificationChannel) -> Self {
        Self {
            channel,
            enabled: true,
            severity_filter: None,
            rate_limit_minutes: default_rate_limit(),
            webhook_url: None,
            bot_token: None,
            chat_id: None,
        }
    }

    pub fn with_filter(mut self, severities: &[AlertSeverity]) -> Self {
        self.severity_filter = Some(severities.to_vec());
        self
    }

    pub fn with_rate_limit(mut self, minutes: i64) -> Self {
        self.rate_limit_minutes = minutes;
        self
    }

    fn accepts(&self, severity: AlertSeverity) -> bool {
        match &self.severity_filter {
            Some(filter) if !filter.is_empty() => filter.contains(&severity),
            _ => true,
        }
    }
}

/// One delivery attempt
#[derive(Debug, Clone, Serialize)]
pub struct AlertNotification {
    pub id: Uuid,
    pub channel: NotificationChannel,
    pub subject: String,
    pub message: String,
    pub alert_name: String,
    pub timestamp: DateTime<Utc>,
    pub sent: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ChannelCounts {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct NotificationStats {
    pub total_notifications: usize,
    pub sent_notifications: usize,
    pub failed_notifications: usize,
    pub success_rate: f64,
    pub by_channel: BTreeMap<String, ChannelCounts>,
}

pub fn webhook_payload(alert: &Alert) -> Value {
    json!({
        "alert": {
            "id": alert.id,
            "name": alert.name,
            "severity": alert.severity,
            "message": alert.message,
            "timestamp": alert.timestamp.to_rfc3339(),
            "source": alert.source,
            "metric_name": alert.metric_name,
            "metric_value": alert.metric_value,
            "threshold": alert.threshold,
        },
        "service": SERVICE_NAME,
    })
}

fn display_opt<T: fmt::Display>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

fn upper(severity: AlertSeverity) -> String {
    severity.as_str().to_uppercase()
}

pub fn slack_payload(alert: &Alert) -> Value {
    let color = match alert.severity {
        AlertSeverity::Info => "#36a64f",
        AlertSeverity::Warning => "#ff9500",
        AlertSeverity::Error => "#ff0000",
        AlertSeverity::Critical => "#8b0000",
    };
    let mut fields = vec![
        json!({"title": "Severity", "value": upper(alert.severity), "short": true}),
        json!({"title": "Source", "value": alert.source, "short": true}),
        json!({
            "title": "Timestamp",
            "value": alert.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            "short": true
        }),
    ];
    if let Some(metric) = &alert.metric_name {
        fields.push(json!({"title": "Metric", "value": metric, "short": true}));
        fields.push(json!({"title": "Value", "value": display_opt(&alert.metric_value), "short": true}));
        fields.push(json!({"title": "Threshold", "value": display_opt(&alert.threshold), "short": true}));
    }
    json!({
        "attachments": [{
            "color": color,
            "title": format!("Alert: {}", alert.name),
            "text": alert.message,
            "fields": fields,
        }]
    })
}

pub fn discord_payload(alert: &Alert) -> Value {
    let color: u32 = match alert.severity {
        AlertSeverity::Info => 0x36a64f,
        AlertSeverity::Warning => 0xff9500,
        AlertSeverity::Error => 0xff0000,
        AlertSeverity::Critical => 0x8b0000,
    };
    let mut fields = vec![
        json!({"name": "Severity", "value": upper(alert.severity), "inline": true}),
        json!({"name": "Source", "value": alert.source, "inline": true}),
    ];
    if let Some(metric) = &alert.metric_name {
        fields.push(json!({"name": "Metric", "value": metric, "inline": true}));
        fields.push(json!({"name": "Value", "value": display_opt(&alert.metric_value), "inline": true}));
        fields.push(json!({"name": "Threshold", "value": display_opt(&alert.threshold), "inline": true}));
    }
    json!({
        "embeds": [{
            "title": format!("Alert: {}", alert.name),
            "description": alert.message,
            "color": color,
            "timestamp": alert.timestamp.to_rfc3339(),
            "fields": fields,
        }]
    })
}

pub fn telegram_payload(alert: &Alert, chat_id: &str) -> Value {
    let mut text = format!(
        "*Alert: {}*\n*Severity:* {}\n*Message:* {}\n*Source:* {}\n*Time:* {}\n",
        alert.name,
        upper(alert.severity),
        alert.message,
        alert.source,
        alert.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
    );
    if let Some(metric) = &alert.metric_name {
        text.push_str(&format!(
            "\n*Metric:* {}\n*Value:* {}\n*Threshold:* {}\n",
            metric,
            display_opt(&alert.metric_value),
            display_opt(&alert.threshold),
        ));
    }
    json!({
        "chat_id": chat_id,
        "text": text,
        "parse_mode": "Markdown",
    })
}

pub struct AlertManager {
    client: reqwest::Client,
    configs: Mutex<BTreeMap<NotificationChannel, NotificationConfig>>,
    notifications: Mutex<Vec<AlertNotification>>,
    last_sent: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertManager {
    /// Console and log channels only
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        let configs = BTreeMap::from([
            (
                NotificationChannel::Console,
                NotificationConfig::new(NotificationChannel::Console)
                    .with_filter(&[AlertSeverity::Warning, AlertSeverity::Error, AlertSeverity::Critical])
                    .with_rate_limit(0),
            ),
            (
                NotificationChannel::Log,
                NotificationConfig::new(NotificationChannel::Log)
                    .with_filter(&[AlertSeverity::Error, AlertSeverity::Critical])
                    .with_rate_limit(0),
            ),
        ]);
        Self {
            client,
            configs: Mutex::new(configs),
            notifications: Mutex::new(Vec::new()),
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Adds every remote channel that has credentials configured
    pub fn from_settings(settings: &AppSettings) -> Self {
        let manager = Self::new();
        let severe = [AlertSeverity::Error, AlertSeverity::Critical];
        let remote = |channel: NotificationChannel| NotificationConfig::new(channel).with_filter(&severe);

        if let Some(url) = &settings.alert_webhook_url {
            let mut config = remote(NotificationChannel::Webhook);
            config.webhook_url = Some(url.clone());
            manager.add_config(config);
        }
        if let Some(url) = &settings.slack_webhook_url {
            let mut config = remote(NotificationChannel::Slack);
            config.webhook_url = Some(url.clone());
            manager.add_config(config);
        }
        if let Some(url) = &settings.discord_webhook_url {
            let mut config = remote(NotificationChannel::Discord);
            config.webhook_url = Some(url.clone());
            manager.add_config(config);
        }
        if let (Some(token), Some(chat)) = (&settings.telegram_bot_token, &settings.telegram_chat_id) {
            let mut config = remote(NotificationChannel::Telegram);
            config.bot_token = Some(token.clone());
            config.chat_id = Some(chat.clone());
            manager.add_config(config);
        }
        manager
    }

    /// Insert or replace the config for its channel
    pub fn add_config(&self, config: NotificationConfig) {
        info!("Configured {} alert channel", config.channel);
        self.configs.lock().insert(config.channel, config);
    }

    pub fn remove_config(&self, channel: NotificationChannel) -> bool {
        self.configs.lock().remove(&channel).is_some()
    }

    pub fn configs(&self) -> Vec<NotificationConfig> {
        self.configs.lock().values().cloned().collect()
    }

    /// False when the same alert went out on this channel within its window
    fn take_rate_slot(&self, alert: &Alert, config: &NotificationConfig) -> bool {
        if config.rate_limit_minutes <= 0 {
            return true;
        }
        let key = format!("{}_{}", config.channel, alert.name);
        let now = Utc::now();
        let mut last_sent = self.last_sent.lock();
        if let Some(last) = last_sent.get(&key) {
            if now - *last < ChronoDuration::minutes(config.rate_limit_minutes) {
                return false;
            }
        }
        last_sent.insert(key, now);
        true
    }

    pub async fn process_alert(&self, alert: &Alert) {
        info!("Processing alert: {} ({})", alert.name, alert.severity);
        let configs = self.configs();
        for config in configs {
            if !config.enabled || !config.accepts(alert.severity) {
                continue;
            }
            if !self.take_rate_slot(alert, &config) {
                continue;
            }

            let result = self.send(alert, &config).await;
            if let Err(e) = &result {
                error!("Error sending {} notification: {}", config.channel, e);
            }
            self.notifications.lock().push(AlertNotification {
                id: Uuid::new_v4(),
                channel: config.channel,
                subject: format!("Alert: {} - {}", alert.name, upper(alert.severity)),
                message: alert.message.clone(),
                alert_name: alert.name.clone(),
                timestamp: Utc::now(),
                sent: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            });
        }
    }

    async fn send(&self, alert: &Alert, config: &NotificationConfig) -> Result<(), TubeloadError> {
        match config.channel {
            NotificationChannel::Console => {
                println!("[{}] {}", upper(alert.severity), alert.name);
                println!("  Message: {}", alert.message);
                println!("  Source: {}", alert.source);
                println!("  Time: {}", alert.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
                if let Some(metric) = &alert.metric_name {
                    println!(
                        "  Metric: {} = {} (threshold: {})",
                        metric,
                        display_opt(&alert.metric_value),
                        display_opt(&alert.threshold)
                    );
                }
                Ok(())
            }
            NotificationChannel::Log => {
                match alert.severity {
                    AlertSeverity::Critical | AlertSeverity::Error => {
                        error!("ALERT [{}] {}: {}", upper(alert.severity), alert.name, alert.message)
                    }
                    AlertSeverity::Warning => {
                        warn!("ALERT [{}] {}: {}", upper(alert.severity), alert.name, alert.message)
                    }
                    AlertSeverity::Info => {
                        info!("ALERT [{}] {}: {}", upper(alert.severity), alert.name, alert.message)
                    }
                }
                Ok(())
            }
            NotificationChannel::Webhook => self.post(config.webhook_url.as_deref(), webhook_payload(alert)).await,
            NotificationChannel::Slack => self.post(config.webhook_url.as_deref(), slack_payload(alert)).await,
            NotificationChannel::Discord => self.post(config.webhook_url.as_deref(), discord_payload(alert)).await,
            NotificationChannel::Telegram => {
                let (Some(token), Some(chat)) = (&config.bot_token, &config.chat_id) else {
                    return Err(TubeloadError::Validation("Telegram bot token or chat id missing".into()));
                };
                let url = format!("https://api.telegram.org/bot{}/sendMessage", token);
                self.post(Some(&url), telegram_payload(alert, chat)).await
            }
        }
    }

    async fn post(&self, url: Option<&str>, payload: Value) -> Result<(), TubeloadError> {
        let url = url.ok_or_else(|| TubeloadError::Validation("No webhook URL configured".into()))?;
        self.client
            .post(url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Newest first
    pub fn notifications(
        &self,
        channel: Option<NotificationChannel>,
        since: Option<DateTime<Utc>>,
    ) -> Vec<AlertNotification> {
        let mut out: Vec<AlertNotification> = self
            .notifications
            .lock()
            .iter()
            .filter(|n| channel.map_or(true, |c| n.channel == c))
            .filter(|n| since.map_or(true, |s| n.timestamp >= s))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        out
    }

    pub fn notification_stats(&self) -> NotificationStats {
        let notifications = self.notifications.lock();
        let mut stats = NotificationStats {
            total_notifications: notifications.len(),
            ..NotificationStats::default()
        };
        for n in notifications.iter() {
            let counts = stats.by_channel.entry(n.channel.to_string()).or_default();
            counts.total += 1;
            if n.sent {
                counts.sent += 1;
                stats.sent_notifications += 1;
            } else {
                counts.failed += 1;
                stats.failed_notifications += 1;
            }
        }
        if stats.total_notifications > 0 {
            stats.success_rate = stats.sent_notifications as f64 / stats.total_notifications as f64;
        }
        stats
    }

    pub fn cleanup_old_notifications(&self, days: i64) -> usize {
        let cutoff = Utc::now() - ChronoDuration::days(days);
        let mut notifications = self.notifications.lock();
        let before = notifications.len();
        notifications.retain(|n| n.timestamp > cutoff);
        let cleaned = before - notifications.len();
        info!("Cleaned up {} old notifications", cleaned);
        cleaned
    }
}

#[async_trait]
impl AlertHandler for AlertManager {
    async fn handle(&self, alert: &Alert) {
        self.process_alert(alert).await;
    }
}
