//! Metrics, alerts, health checks and alert notification settings

use super::error::ApiError;
use super::extract::AdminUser;
use crate::app::SharedState;
use crate::monitoring::{AlertSeverity, Metric, MetricType, NotificationChannel, NotificationConfig};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

const MIN_INTERVAL_SECS: u64 = 10;
const DEFAULT_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Deserialize)]
pub struct MetricsParams {
    pub name: Option<String>,
    pub hours: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RecordMetricBody {
    pub name: String,
    pub value: f64,
    #[serde(default, rename = "type")]
    pub metric_type: Option<MetricType>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AlertParams {
    pub severity: Option<String>,
    pub resolved: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ThresholdBody {
    pub severity: String,
    pub threshold: f64,
}

#[derive(Debug, Deserialize)]
pub struct ChannelParams {
    pub channel: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StartBody {
    pub interval_seconds: u64,
}

#[derive(Debug, Deserialize)]
pub struct CleanupParams {
    pub days: Option<i64>,
}

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/monitoring/metrics", get(list_metrics).post(record_metric))
        .route("/monitoring/metrics/collect", post(collect_metrics))
        .route("/monitoring/metrics/{name}/stats", get(metric_stats))
        .route("/monitoring/health", get(health))
        .route("/monitoring/health/check", post(run_health_checks))
        .route("/monitoring/alerts", get(list_alerts))
        .route("/monitoring/stats", get(summary))
        .route("/monitoring/thresholds", get(thresholds))
        .route("/monitoring/thresholds/{name}", post(set_threshold))
        .route("/monitoring/notifications", get(list_notifications))
        .route("/monitoring/notifications/stats", get(notification_stats))
        .route(
            "/monitoring/config/notifications",
            get(notification_configs).post(add_notification_config),
        )
        .route(
            "/monitoring/config/notifications/{channel}",
            delete(remove_notification_config),
        )
        .route("/monitoring/start", post(start))
        .route("/monitoring/stop", post(stop))
        .route("/monitoring/status", get(status))
        .route("/monitoring/cleanup", post(cleanup))
}

fn parse_severity(raw: &str) -> Result<AlertSeverity, ApiError> {
    raw.parse::<AlertSeverity>()
        .map_err(|_| ApiError::BadRequest(format!("Invalid severity: {}", raw)))
}

fn parse_channel(raw: &str) -> Result<NotificationChannel, ApiError> {
    raw.parse::<NotificationChannel>()
        .map_err(|_| ApiError::BadRequest(format!("Invalid channel: {}", raw)))
}

async fn list_metrics(
    State(state): State<SharedState>,
    Query(params): Query<MetricsParams>,
) -> impl IntoResponse {
    let hours = params.hours.unwrap_or(1).max(1);
    let since = Utc::now() - ChronoDuration::hours(hours);
    let metrics = state.monitoring.metrics(params.name.as_deref(), Some(since), None);
    Json(json!({ "metrics": metrics, "count": metrics.len(), "hours": hours }))
}

async fn metric_stats(State(state): State<SharedState>, Path(name): Path<String>) -> impl IntoResponse {
    Json(state.monitoring.metric_stats(&name))
}

async fn collect_metrics(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let metrics = state.monitoring.collect_app_metrics().await?;
    Ok(Json(json!({ "message": "Metrics collected", "metrics": metrics })))
}

async fn record_metric(
    State(state): State<SharedState>,
    Json(body): Json<RecordMetricBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.name.trim().is_empty() || !body.value.is_finite() {
        return Err(ApiError::BadRequest("Metric needs a name and a finite value".to_string()));
    }
    let mut metric = Metric::new(body.name, body.value, body.metric_type.unwrap_or(MetricType::Gauge));
    metric.labels = body.labels;
    metric.description = body.description;
    state.monitoring.record(metric.clone()).await;
    Ok(Json(json!({ "message": "Metric recorded", "metric": metric })))
}

async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.monitoring.health_status())
}

async fn run_health_checks(State(state): State<SharedState>) -> impl IntoResponse {
    let checks = state.monitoring.run_health_checks().await;
    Json(json!({ "checks": checks, "summary": state.monitoring.health_status() }))
}

async fn list_alerts(
    State(state): State<SharedState>,
    Query(params): Query<AlertParams>,
) -> Result<impl IntoResponse, ApiError> {
    let severity = params.severity.as_deref().map(parse_severity).transpose()?;
    let alerts = state.monitoring.alerts(severity, params.resolved, None);
    Ok(Json(json!({ "alerts": alerts, "count": alerts.len() })))
}

async fn summary(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.monitoring.summary())
}

async fn thresholds(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.monitoring.thresholds())
}

async fn set_threshold(
    State(state): State<SharedState>,
    AdminUser(_): AdminUser,
    Path(name): Path<String>,
    Json(body): Json<ThresholdBody>,
) -> Result<impl IntoResponse, ApiError> {
    let severity = parse_severity(&body.severity)?;
    state.monitoring.set_threshold(&name, severity, body.threshold);
    Ok(Json(json!({
        "message": "Threshold updated",
        "metric": name,
        "severity": severity,
        "threshold": body.threshold,
    })))
}

async fn list_notifications(
    State(state): State<SharedState>,
    Query(params): Query<ChannelParams>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = params.channel.as_deref().map(parse_channel).transpose()?;
    let notifications = state.alerts.notifications(channel, None);
    Ok(Json(json!({ "notifications": notifications, "count": notifications.len() })))
}

async fn notification_stats(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.alerts.notification_stats())
}

async fn notification_configs(
    State(state): State<SharedState>,
    AdminUser(_): AdminUser,
) -> impl IntoResponse {
    Json(state.alerts.configs())
}

async fn add_notification_config(
    State(state): State<SharedState>,
    AdminUser(_): AdminUser,
    Json(config): Json<NotificationConfig>,
) -> Result<impl IntoResponse, ApiError> {
    let needs_url = matches!(
        config.channel,
        NotificationChannel::Webhook | NotificationChannel::Slack | NotificationChannel::Discord
    );
    if needs_url && config.webhook_url.is_none() {
        return Err(ApiError::BadRequest(format!("{} channel requires webhook_url", config.channel)));
    }
    if config.channel == NotificationChannel::Telegram && (config.bot_token.is_none() || config.chat_id.is_none()) {
        return Err(ApiError::BadRequest("telegram channel requires bot_token and chat_id".to_string()));
    }
    let channel = config.channel;
    state.alerts.add_config(config);
    Ok(Json(json!({ "message": "Notification channel configured", "channel": channel })))
}

async fn remove_notification_config(
    State(state): State<SharedState>,
    AdminUser(_): AdminUser,
    Path(channel): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = parse_channel(&channel)?;
    if !state.alerts.remove_config(channel) {
        return Err(ApiError::NotFound(format!("No configuration for channel {}", channel)));
    }
    Ok(Json(json!({ "message": "Notification channel removed", "channel": channel })))
}

async fn start(
    State(state): State<SharedState>,
    AdminUser(_): AdminUser,
    Json(body): Json<StartBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.interval_seconds < MIN_INTERVAL_SECS {
        return Err(ApiError::BadRequest(format!(
            "interval_seconds must be at least {}",
            MIN_INTERVAL_SECS
        )));
    }
    let started = state
        .monitoring
        .start(Duration::from_secs(body.interval_seconds));
    let message = if started {
        "Monitoring started"
    } else {
        "Monitoring is already running"
    };
    Ok(Json(json!({
        "message": message,
        "running": state.monitoring.is_running(),
        "interval_seconds": body.interval_seconds,
    })))
}

async fn stop(State(state): State<SharedState>, AdminUser(_): AdminUser) -> impl IntoResponse {
    let stopped = state.monitoring.stop();
    let message = if stopped {
        "Monitoring stopped"
    } else {
        "Monitoring was not running"
    };
    Json(json!({ "message": message, "running": state.monitoring.is_running() }))
}

async fn status(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "running": state.monitoring.is_running(),
        "enabled": state.monitoring.is_enabled(),
        "notification_channels": state.alerts.configs().len(),
        "timestamp": Utc::now(),
    }))
}

async fn cleanup(
    State(state): State<SharedState>,
    AdminUser(_): AdminUser,
    Query(params): Query<CleanupParams>,
) -> impl IntoResponse {
    let days = params.days.unwrap_or(DEFAULT_RETENTION_DAYS).max(1);
    let monitoring = state.monitoring.cleanup_old_data(days);
    let notifications = state.alerts.cleanup_old_notifications(days);
    Json(json!({
        "message": "Cleanup completed",
        "metrics_and_alerts": monitoring,
        "notifications": notifications,
    }))
}
