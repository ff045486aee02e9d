//! Broadcast fan-out of download, queue and stats updates

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 1024;

/// Logical stream a subscriber listens on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Download(Uuid),
    Queue,
    Stats,
    General,
    Dashboard,
}

impl Channel {
    /// Bucket used for connection counting
    pub fn kind(&self) -> &'static str {
        match self {
            Channel::Download(_) => "downloads",
            Channel::Queue => "queue",
            Channel::Stats => "stats",
            Channel::General => "general",
            Channel::Dashboard => "dashboard",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Download(id) => write!(f, "download:{}", id),
            other => f.write_str(other.kind()),
        }
    }
}

/// JSON payload delivered to every subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: String,
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_id: Option<Uuid>,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: impl Into<String>, channel: Channel, data: Value) -> Self {
        let download_id = match channel {
            Channel::Download(id) => Some(id),
            _ => None,
        };
        Self {
            kind: kind.into(),
            channel: channel.to_string(),
            download_id,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Which notifications a subscriber wants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    All,
    Channel(Channel),
}

impl Filter {
    pub fn matches(&self, n: &Notification) -> bool {
        match self {
            Filter::All => true,
            Filter::Channel(Channel::Download(id)) => n.download_id == Some(*id),
            Filter::Channel(c) => n.channel == c.kind(),
        }
    }
}

/// Filtered view of the broadcast stream
pub struct Subscription {
    rx: broadcast::Receiver<Notification>,
    filter: Filter,
}

impl Subscription {
    /// Next matching notification. `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.rx.recv().await {
                Ok(n) if self.filter.matches(&n) => return Some(n),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Subscriber lagged, skipped {} notifications", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Decrements the live connection count on drop
pub struct ConnectionGuard {
    kind: &'static str,
    counts: Arc<Mutex<BTreeMap<&'static str, usize>>>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let mut counts = self.counts.lock();
        if let Some(n) = counts.get_mut(self.kind) {
            *n = n.saturating_sub(1);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionCounts {
    pub channels: BTreeMap<String, usize>,
    pub total: usize,
}

pub struct NotificationHub {
    tx: broadcast::Sender<Notification>,
    counts: Arc<Mutex<BTreeMap<&'static str, usize>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            counts: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Publish to every subscriber. Dropped silently when nobody listens.
    pub fn publish(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }

    pub fn subscribe(&self, filter: Filter) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            filter,
        }
    }

    pub fn connect(&self, channel: Channel) -> ConnectionGuard {
        let kind = channel.kind();
        *self.counts.lock().entry(kind).or_insert(0) += 1;
        ConnectionGuard {
            kind,
            counts: self.counts.clone(),
        }
    }

    pub fn connection_counts(&self) -> ConnectionCounts {
        let counts = self.counts.lock();
        let channels: BTreeMap<String, usize> = ["downloads", "queue", "stats", "general", "dashboard"]
            .iter()
            .map(|k| (k.to_string(), counts.get(k).copied().unwrap_or(0)))
            .collect();
        let total = channels.values().sum();
        ConnectionCounts { channels, total }
    }

    pub fn send_download_update(&self, id: Uuid, data: Value) {
        self.publish(Notification::new("download_update", Channel::Download(id), data));
    }

    pub fn send_queue_update(&self, data: Value) {
        self.publish(Notification::new("queue_update", Channel::Queue, data));
    }

    pub fn send_stats_update(&self, data: Value) {
        self.publish(Notification::new("stats_update", Channel::Stats, data));
    }

    pub fn send_dashboard_update(&self, data: Value) {
        self.publish(Notification::new("dashboard_update", Channel::Dashboard, data));
    }

    pub fn send_general_message(&self, kind: &str, data: Value) {
        self.publish(Notification::new(kind, Channel::General, data));
    }

    pub fn notify_download_progress(
        &self,
        id: Uuid,
        progress: f64,
        status: &str,
        title: Option<&str>,
        thumbnail: Option<&str>,
        url: Option<&str>,
    ) {
        self.send_download_update(
            id,
            json!({
                "download_id": id,
                "progress": progress,
                "status": status,
                "title": title,
                "thumbnail": thumbnail,
                "url": url,
            }),
        );
    }

    pub fn notify_download_completed(
        &self,
        id: Uuid,
        title: Option<&str>,
        file_path: Option<&str>,
        file_size: Option<i64>,
        format: Option<&str>,
    ) {
        self.send_download_update(
            id,
            json!({
                "download_id": id,
                "progress": 100.0,
                "status": "completed",
                "title": title,
                "file_path": file_path,
                "file_size": file_size,
                "format": format,
            }),
        );
    }

    pub fn notify_download_failed(&self, id: Uuid, error: &str) {
        self.send_download_update(
            id,
            json!({
                "download_id": id,
                "status": "failed",
                "error": error,
            }),
        );
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_without_subscribers_is_fine() {
        let hub = NotificationHub::new();
        hub.send_queue_update(json!({"pending": 0}));
    }

    #[tokio::test]
    async fn test_download_filter() {
        let hub = NotificationHub::new();
        let watched = Uuid::new_v4();
        let mut sub = hub.subscribe(Filter::Channel(Channel::Download(watched)));

        hub.notify_download_progress(Uuid::new_v4(), 10.0, "downloading", None, None, None);
        hub.send_stats_update(json!({}));
        hub.notify_download_failed(watched, "boom");

        let n = sub.recv().await.unwrap();
        assert_eq!(n.kind, "download_update");
        assert_eq!(n.download_id, Some(watched));
        assert_eq!(n.data["status"], "failed");
    }

    #[tokio::test]
    async fn test_channel_filter_and_all() {
        let hub = NotificationHub::new();
        let mut queue = hub.subscribe(Filter::Channel(Channel::Queue));
        let mut all = hub.subscribe(Filter::All);

        hub.send_general_message("announcement", json!({"text": "hi"}));
        hub.send_queue_update(json!({"pending": 2}));

        assert_eq!(queue.recv().await.unwrap().data["pending"], 2);
        assert_eq!(all.recv().await.unwrap().kind, "announcement");
        assert_eq!(all.recv().await.unwrap().kind, "queue_update");
    }

    #[tokio::test]
    async fn test_lagging_subscriber_keeps_going() {
        let hub = NotificationHub::new();
        let mut sub = hub.subscribe(Filter::All);
        for i in 0..(CHANNEL_CAPACITY + 10) {
            hub.send_stats_update(json!({ "i": i }));
        }
        let n = sub.recv().await.unwrap();
        assert!(n.data["i"].as_u64().unwrap() >= 10);
    }

    #[test]
    fn test_connection_counts() {
        let hub = NotificationHub::new();
        let a = hub.connect(Channel::Queue);
        let b = hub.connect(Channel::Download(Uuid::new_v4()));
        let _c = hub.connect(Channel::Queue);
        let counts = hub.connection_counts();
        assert_eq!(counts.channels["queue"], 2);
        assert_eq!(counts.channels["downloads"], 1);
        assert_eq!(counts.total, 3);

        drop(a);
        drop(b);
        let counts = hub.connection_counts();
        assert_eq!(counts.channels["queue"], 1);
        assert_eq!(counts.total, 1);
    }

    #[test]
    fn test_notification_shape() {
        let id = Uuid::new_v4();
        let n = Notification::new("download_update", Channel::Download(id), json!({}));
        let v: Value = serde_json::from_str(&n.to_json()).unwrap();
        assert_eq!(v["type"], "download_update");
        assert_eq!(v["channel"], format!("download:{}", id));
        assert!(v.get("timestamp").is_some());

        let q = Notification::new("queue_update", Channel::Queue, json!({}));
        assert!(serde_json::to_value(&q).unwrap().get("download_id").is_none());
    }
}
