//! Metric samples, threshold alerts and health checks

use crate::database::DatabaseManager;
use crate::queue::DownloadQueue;
use crate::storage::FileStorage;
use crate::utils::TubeloadError;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::System;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Samples kept per metric name
const MAX_SAMPLES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertSeverity {
    type Err = TubeloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(AlertSeverity::Info),
            "warning" => Ok(AlertSeverity::Warning),
            "error" => Ok(AlertSeverity::Error),
            "critical" => Ok(AlertSeverity::Critical),
            other => Err(TubeloadError::Validation(format!("Unknown alert severity: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Summary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Metric {
    pub fn new(name: impl Into<String>, value: f64, metric_type: MetricType) -> Self {
        Self {
            name: name.into(),
            value,
            metric_type,
            timestamp: Utc::now(),
            labels: BTreeMap::new(),
            description: None,
        }
    }

    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, value, MetricType::Gauge)
    }

    pub fn counter(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, value, MetricType::Counter)
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: String,
    pub name: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub metric_name: Option<String>,
    pub metric_value: Option<f64>,
    pub threshold: Option<f64>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// What a registered check reports
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub message: String,
    pub details: Value,
}

impl HealthReport {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            message: message.into(),
            details: Value::Null,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub response_time_ms: Option<f64>,
    pub details: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub status: HealthStatus,
    pub message: String,
    pub checks_count: usize,
    pub healthy_count: usize,
    pub unhealthy_count: usize,
    pub degraded_count: usize,
    pub checks: Vec<HealthCheck>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MetricStats {
    pub metric_name: String,
    pub count: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub median: Option<f64>,
    pub std_dev: Option<f64>,
    pub latest_value: Option<f64>,
    pub latest_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitoringSummary {
    pub metrics_count: usize,
    pub active_alerts_count: usize,
    pub alerts_by_severity: BTreeMap<String, usize>,
    pub health_status: HealthSummary,
    pub monitoring_enabled: bool,
    pub timestamp: DateTime<Utc>,
}

/// Receives every alert raised by the monitoring service
#[async_trait]
pub trait AlertHandler: Send + Sync {
    async fn handle(&self, alert: &Alert);
}

type CheckFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<HealthReport>> + Send + Sync>;

/// Where application metrics come from
#[derive(Clone)]
pub struct MetricSources {
    pub db: DatabaseManager,
    pub queue: DownloadQueue,
    pub videos_dir: PathBuf,
}

#[derive(Default)]
struct MonitorState {
    metrics: HashMap<String, VecDeque<Metric>>,
    alerts: Vec<Alert>,
    thresholds: BTreeMap<String, BTreeMap<AlertSeverity, f64>>,
    health: BTreeMap<String, HealthCheck>,
}

fn default_thresholds() -> BTreeMap<String, BTreeMap<AlertSeverity, f64>> {
    let table: [(&str, [f64; 3]); 5] = [
        ("cpu_usage", [70.0, 85.0, 95.0]),
        ("memory_usage", [80.0, 90.0, 95.0]),
        ("disk_usage", [80.0, 90.0, 95.0]),
        ("response_time", [1000.0, 3000.0, 5000.0]),
        ("error_rate", [5.0, 10.0, 20.0]),
    ];
    table
        .into_iter()
        .map(|(name, [warning, error, critical])| {
            let levels = BTreeMap::from([
                (AlertSeverity::Warning, warning),
                (AlertSeverity::Error, error),
                (AlertSeverity::Critical, critical),
            ]);
            (name.to_string(), levels)
        })
        .collect()
}

impl MonitorState {
    fn open_alert_mut(&mut self, name: &str) -> Option<&mut Alert> {
        self.alerts.iter_mut().find(|a| a.name == name && !a.resolved)
    }

    /// Raise or resolve alerts for `metric`, returning the newly raised ones
    fn check_alerts(&mut self, metric: &Metric) -> Vec<Alert> {
        let Some(levels) = self.thresholds.get(&metric.name).cloned() else {
            return Vec::new();
        };
        let mut raised = Vec::new();
        for (severity, threshold) in levels {
            let name = format!("{}_{}", metric.name, severity);
            if metric.value >= threshold {
                if self.open_alert_mut(&name).is_some() {
                    continue;
                }
                let alert = Alert {
                    id: Uuid::new_v4().to_string(),
                    message: format!(
                        "{} exceeded {} threshold: {} >= {}",
                        metric.name, severity, metric.value, threshold
                    ),
                    name,
                    severity,
                    timestamp: Utc::now(),
                    source: "monitoring_service".to_string(),
                    metric_name: Some(metric.name.clone()),
                    metric_value: Some(metric.value),
                    threshold: Some(threshold),
                    resolved: false,
                    resolved_at: None,
                };
                self.alerts.push(alert.clone());
                raised.push(alert);
            } else if let Some(open) = self.open_alert_mut(&name) {
                open.resolved = true;
                open.resolved_at = Some(Utc::now());
                info!("Alert resolved: {}", name);
            }
        }
        raised
    }
}

pub struct MonitoringService {
    state: Mutex<MonitorState>,
    handlers: Mutex<Vec<Arc<dyn AlertHandler>>>,
    checks: Mutex<BTreeMap<String, CheckFn>>,
    enabled: AtomicBool,
    running: Mutex<Option<CancellationToken>>,
    sources: Option<MetricSources>,
    system: Mutex<System>,
}

impl Default for MonitoringService {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitoringService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MonitorState {
                thresholds: default_thresholds(),
                ..MonitorState::default()
            }),
            handlers: Mutex::new(Vec::new()),
            checks: Mutex::new(BTreeMap::new()),
            enabled: AtomicBool::new(true),
            running: Mutex::new(None),
            sources: None,
            system: Mutex::new(System::new()),
        }
    }

    pub fn with_sources(sources: MetricSources) -> Self {
        Self {
            sources: Some(sources),
            ..Self::new()
        }
    }

    pub fn add_alert_handler(&self, handler: Arc<dyn AlertHandler>) {
        self.handlers.lock().push(handler);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Store a sample and raise or resolve threshold alerts
    pub async fn record(&self, metric: Metric) {
        if !self.is_enabled() {
            return;
        }
        let raised = {
            let mut state = self.state.lock();
            let ring = state.metrics.entry(metric.name.clone()).or_default();
            if ring.len() >= MAX_SAMPLES {
                ring.pop_front();
            }
            ring.push_back(metric.clone());
            state.check_alerts(&metric)
        };
        if raised.is_empty() {
            return;
        }

        let handlers = self.handlers.lock().clone();
        for alert in &raised {
            warn!("Alert triggered: {}", alert.message);
            for handler in &handlers {
                handler.handle(alert).await;
            }
        }
    }

    /// Samples sorted by time, optionally for one metric and a time range
    pub fn metrics(
        &self,
        name: Option<&str>,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Vec<Metric> {
        let state = self.state.lock();
        let mut out: Vec<Metric> = match name {
            Some(name) => state
                .metrics
                .get(name)
                .map(|ring| ring.iter().cloned().collect())
                .unwrap_or_default(),
            None => state.metrics.values().flatten().cloned().collect(),
        };
        drop(state);

        out.retain(|m| since.map_or(true, |s| m.timestamp >= s) && until.map_or(true, |u| m.timestamp <= u));
        out.sort_by_key(|m| m.timestamp);
        out
    }

    pub fn metric_stats(&self, name: &str) -> MetricStats {
        let samples = self.metrics(Some(name), None, None);
        let mut stats = MetricStats {
            metric_name: name.to_string(),
            count: samples.len(),
            ..MetricStats::default()
        };
        let Some(latest) = samples.last() else {
            return stats;
        };

        let values: Vec<f64> = samples.iter().map(|m| m.value).collect();
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let mut sorted = values.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };
        // Sample standard deviation
        let std_dev = if values.len() > 1 {
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };

        stats.min = sorted.first().copied();
        stats.max = sorted.last().copied();
        stats.avg = Some(mean);
        stats.median = Some(median);
        stats.std_dev = Some(std_dev);
        stats.latest_value = Some(latest.value);
        stats.latest_timestamp = Some(latest.timestamp);
        stats
    }

    /// Newest first
    pub fn alerts(
        &self,
        severity: Option<AlertSeverity>,
        resolved: Option<bool>,
        since: Option<DateTime<Utc>>,
    ) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .state
            .lock()
            .alerts
            .iter()
            .filter(|a| severity.map_or(true, |s| a.severity == s))
            .filter(|a| resolved.map_or(true, |r| a.resolved == r))
            .filter(|a| since.map_or(true, |s| a.timestamp >= s))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        alerts
    }

    pub fn set_threshold(&self, metric: &str, severity: AlertSeverity, threshold: f64) {
        self.state
            .lock()
            .thresholds
            .entry(metric.to_string())
            .or_default()
            .insert(severity, threshold);
        info!("Threshold for {} ({}) set to {}", metric, severity, threshold);
    }

    pub fn thresholds(&self) -> BTreeMap<String, BTreeMap<String, f64>> {
        self.state
            .lock()
            .thresholds
            .iter()
            .map(|(name, levels)| {
                let levels = levels.iter().map(|(s, v)| (s.to_string(), *v)).collect();
                (name.clone(), levels)
            })
            .collect()
    }

    pub fn register_health_check<F, Fut>(&self, name: impl Into<String>, check: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<HealthReport>> + Send + 'static,
    {
        let check: CheckFn = Arc::new(move || -> BoxFuture<'static, anyhow::Result<HealthReport>> {
            Box::pin(check())
        });
        self.checks.lock().insert(name.into(), check);
    }

    pub async fn run_health_checks(&self) -> BTreeMap<String, HealthCheck> {
        let checks: Vec<(String, CheckFn)> = self
            .checks
            .lock()
            .iter()
            .map(|(name, check)| (name.clone(), Arc::clone(check)))
            .collect();

        let mut results = BTreeMap::new();
        for (name, check) in checks {
            let started = Instant::now();
            let outcome = check().await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            let result = match outcome {
                Ok(report) => HealthCheck {
                    name: name.clone(),
                    status: report.status,
                    message: report.message,
                    timestamp: Utc::now(),
                    response_time_ms: Some(elapsed_ms),
                    details: report.details,
                },
                Err(e) => {
                    error!("Health check {} failed: {}", name, e);
                    HealthCheck {
                        name: name.clone(),
                        status: HealthStatus::Unhealthy,
                        message: format!("Health check failed: {}", e),
                        timestamp: Utc::now(),
                        response_time_ms: Some(elapsed_ms),
                        details: Value::Null,
                    }
                }
            };
            results.insert(name, result);
        }

        self.state.lock().health.extend(results.clone());
        results
    }

    pub fn health_status(&self) -> HealthSummary {
        let checks: Vec<HealthCheck> = self.state.lock().health.values().cloned().collect();
        let count = |status: HealthStatus| checks.iter().filter(|c| c.status == status).count();
        let healthy_count = count(HealthStatus::Healthy);
        let unhealthy_count = count(HealthStatus::Unhealthy);
        let degraded_count = count(HealthStatus::Degraded);

        let (status, message) = if checks.is_empty() {
            (HealthStatus::Unknown, "No health checks available".to_string())
        } else if unhealthy_count > 0 {
            (HealthStatus::Unhealthy, format!("{} health checks failed", unhealthy_count))
        } else if degraded_count > 0 {
            (HealthStatus::Degraded, format!("{} health checks degraded", degraded_count))
        } else {
            (HealthStatus::Healthy, "All health checks passing".to_string())
        };

        HealthSummary {
            status,
            message,
            checks_count: checks.len(),
            healthy_count,
            unhealthy_count,
            degraded_count,
            checks,
        }
    }

    pub fn summary(&self) -> MonitoringSummary {
        let recent = self.metrics(None, Some(Utc::now() - ChronoDuration::hours(1)), None);
        let active = self.alerts(None, Some(false), None);
        let mut alerts_by_severity = BTreeMap::new();
        for alert in &active {
            *alerts_by_severity.entry(alert.severity.to_string()).or_insert(0) += 1;
        }

        MonitoringSummary {
            metrics_count: recent.len(),
            active_alerts_count: active.len(),
            alerts_by_severity,
            health_status: self.health_status(),
            monitoring_enabled: self.is_enabled(),
            timestamp: Utc::now(),
        }
    }

    /// Drop samples and alerts older than `days`; returns how many were removed
    pub fn cleanup_old_data(&self, days: i64) -> usize {
        let cutoff = Utc::now() - ChronoDuration::days(days);
        let mut state = self.state.lock();

        let mut metrics_cleaned = 0;
        for ring in state.metrics.values_mut() {
            let before = ring.len();
            ring.retain(|m| m.timestamp > cutoff);
            metrics_cleaned += before - ring.len();
        }
        state.metrics.retain(|_, ring| !ring.is_empty());

        let before = state.alerts.len();
        state.alerts.retain(|a| a.timestamp > cutoff);
        let alerts_cleaned = before - state.alerts.len();

        info!(
            "Cleaned up {} old metrics and {} old alerts",
            metrics_cleaned, alerts_cleaned
        );
        metrics_cleaned + alerts_cleaned
    }

    /// Host CPU and memory usage as percentages. CPU usage is measured
    /// since the previous call, so the first sample reads zero.
    pub fn collect_system_metrics(&self) -> Vec<Metric> {
        let mut system = self.system.lock();
        system.refresh_cpu_usage();
        system.refresh_memory();

        let memory = if system.total_memory() > 0 {
            system.used_memory() as f64 / system.total_memory() as f64 * 100.0
        } else {
            0.0
        };
        vec![
            Metric::gauge("cpu_usage", f64::from(system.global_cpu_usage()))
                .with_description("Host CPU usage (%)"),
            Metric::gauge("memory_usage", memory).with_description("Host memory usage (%)"),
        ]
    }

    /// Sample host, queue, download and storage figures and record them
    pub async fn collect_app_metrics(&self) -> Result<Vec<Metric>, TubeloadError> {
        let mut metrics = self.collect_system_metrics();
        let Some(sources) = &self.sources else {
            for metric in &metrics {
                self.record(metric.clone()).await;
            }
            return Ok(metrics);
        };

        let snapshot = sources.queue.queue_snapshot().await?;
        let stats = sources.db.download_stats().await?;
        let (created, failed) = sources
            .db
            .download_outcomes_since(Utc::now() - ChronoDuration::hours(1))
            .await?;
        let error_rate = if created > 0 {
            failed as f64 / created as f64 * 100.0
        } else {
            0.0
        };

        let videos_dir = sources.videos_dir.clone();
        let (disk_bytes, disk_percent) = tokio::task::spawn_blocking(move || {
            (
                FileStorage::disk_usage_bytes(&videos_dir),
                FileStorage::filesystem_usage_percent(&videos_dir),
            )
        })
        .await
        .unwrap_or_else(|e| {
            warn!("Disk usage scan failed: {}", e);
            (0, Err(std::io::Error::other(e.to_string())))
        });

        match disk_percent {
            Ok(percent) => metrics.push(
                Metric::gauge("disk_usage", percent)
                    .with_label("path", sources.videos_dir.display().to_string())
                    .with_description("Filesystem usage (%)"),
            ),
            Err(e) => warn!("Cannot read filesystem usage for {}: {}", sources.videos_dir.display(), e),
        }

        metrics.extend([
            Metric::gauge("queue_depth", snapshot.pending as f64).with_description("Pending downloads"),
            Metric::gauge("active_downloads", snapshot.active as f64),
            Metric::gauge("error_rate", error_rate).with_description("Failed downloads in the last hour (%)"),
            Metric::counter("downloads_total", stats.total as f64),
            Metric::counter("downloads_completed", stats.completed as f64),
            Metric::counter("downloads_failed", stats.failed as f64),
            Metric::gauge("disk_usage_bytes", disk_bytes as f64)
                .with_label("path", sources.videos_dir.display().to_string()),
        ]);
        for metric in &metrics {
            self.record(metric.clone()).await;
        }
        debug!("Collected {} application metrics", metrics.len());
        Ok(metrics)
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Start the collection loop. Returns false when it is already running.
    pub fn start(self: &Arc<Self>, interval: Duration) -> bool {
        let token = {
            let mut running = self.running.lock();
            if running.is_some() {
                warn!("Monitoring is already running");
                return false;
            }
            let token = CancellationToken::new();
            *running = Some(token.clone());
            token
        };

        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = service.collect_app_metrics().await {
                            error!("Error collecting metrics: {}", e);
                        }
                        service.run_health_checks().await;
                    }
                }
            }
            debug!("Monitoring loop stopped");
        });
        info!("Started monitoring with {:?} interval", interval);
        true
    }

    /// Returns false when it was not running
    pub fn stop(&self) -> bool {
        match self.running.lock().take() {
            Some(token) => {
                token.cancel();
                info!("Stopped monitoring service");
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler(AtomicUsize);

    #[async_trait]
    impl AlertHandler for CountingHandler {
        async fn handle(&self, _alert: &Alert) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_threshold_alerts_raise_once_and_resolve() {
        let service = MonitoringService::new();
        let handler = Arc::new(CountingHandler(AtomicUsize::new(0)));
        service.add_alert_handler(handler.clone());

        service.record(Metric::gauge("error_rate", 12.0)).await;
        // warning and error levels crossed
        assert_eq!(handler.0.load(Ordering::SeqCst), 2);
        service.record(Metric::gauge("error_rate", 13.0)).await;
        assert_eq!(handler.0.load(Ordering::SeqCst), 2);

        let open = service.alerts(None, Some(false), None);
        assert_eq!(open.len(), 2);
        assert!(open.iter().any(|a| a.name == "error_rate_error"));

        service.record(Metric::gauge("error_rate", 6.0)).await;
        let open = service.alerts(None, Some(false), None);
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].name, "error_rate_warning");
        assert_eq!(service.alerts(Some(AlertSeverity::Error), Some(true), None).len(), 1);
    }

    #[tokio::test]
    async fn test_metric_stats() {
        let service = MonitoringService::new();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            service.record(Metric::gauge("latency", v)).await;
        }
        let stats = service.metric_stats("latency");
        assert_eq!(stats.count, 8);
        assert_eq!(stats.min, Some(2.0));
        assert_eq!(stats.max, Some(9.0));
        assert_eq!(stats.avg, Some(5.0));
        assert_eq!(stats.median, Some(4.5));
        assert!((stats.std_dev.unwrap() - 2.138).abs() < 0.001);
        assert_eq!(stats.latest_value, Some(9.0));

        let single = MonitoringService::new();
        single.record(Metric::gauge("x", 1.0)).await;
        assert_eq!(single.metric_stats("x").std_dev, Some(0.0));
        assert_eq!(single.metric_stats("missing").count, 0);
    }

    #[tokio::test]
    async fn test_ring_is_bounded() {
        let service = MonitoringService::new();
        for i in 0..(MAX_SAMPLES + 5) {
            service.record(Metric::counter("hits", i as f64)).await;
        }
        let samples = service.metrics(Some("hits"), None, None);
        assert_eq!(samples.len(), MAX_SAMPLES);
        assert_eq!(samples[0].value, 5.0);
    }

    #[tokio::test]
    async fn test_disabled_service_ignores_samples() {
        let service = MonitoringService::new();
        service.set_enabled(false);
        service.record(Metric::gauge("x", 1.0)).await;
        assert!(service.metrics(None, None, None).is_empty());
    }

    #[tokio::test]
    async fn test_health_status_rollup() {
        let service = MonitoringService::new();
        assert_eq!(service.health_status().status, HealthStatus::Unknown);

        service.register_health_check("db", || async { Ok(HealthReport::healthy("ok")) });
        service.run_health_checks().await;
        assert_eq!(service.health_status().status, HealthStatus::Healthy);

        service.register_health_check("disk", || async { Ok(HealthReport::degraded("slow")) });
        service.run_health_checks().await;
        assert_eq!(service.health_status().status, HealthStatus::Degraded);

        service.register_health_check("relay", || async { Err(anyhow::anyhow!("unreachable")) });
        let results = service.run_health_checks().await;
        assert_eq!(results["relay"].status, HealthStatus::Unhealthy);
        assert!(results["relay"].response_time_ms.is_some());

        let summary = service.health_status();
        assert_eq!(summary.status, HealthStatus::Unhealthy);
        assert_eq!(summary.checks_count, 3);
    }

    #[test]
    fn test_thresholds_are_configurable() {
        let service = MonitoringService::new();
        assert_eq!(service.thresholds()["cpu_usage"]["critical"], 95.0);
        service.set_threshold("queue_depth", AlertSeverity::Warning, 50.0);
        assert_eq!(service.thresholds()["queue_depth"]["warning"], 50.0);
        assert!("fatal".parse::<AlertSeverity>().is_err());
    }

    #[tokio::test]
    async fn test_cleanup_and_summary() {
        let service = MonitoringService::new();
        let mut old = Metric::gauge("cpu_usage", 99.0);
        old.timestamp = Utc::now() - ChronoDuration::days(10);
        service.record(old).await;
        service.record(Metric::gauge("memory_usage", 10.0)).await;

        let summary = service.summary();
        assert_eq!(summary.metrics_count, 1);
        assert_eq!(summary.active_alerts_count, 3);
        assert_eq!(summary.alerts_by_severity["critical"], 1);

        // Alerts are stamped when raised, so only the old sample goes
        assert_eq!(service.cleanup_old_data(7), 1);
        assert_eq!(service.metrics(None, None, None).len(), 1);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let service = Arc::new(MonitoringService::new());
        assert!(service.start(Duration::from_secs(60)));
        assert!(!service.start(Duration::from_secs(60)));
        assert!(service.is_running());
        assert!(service.stop());
        assert!(!service.stop());
    }
}
