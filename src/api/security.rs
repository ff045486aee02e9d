//! Security event inspection and IP blocking (admin only)

use super::error::ApiError;
use super::extract::AdminUser;
use crate::app::SharedState;
use crate::security::{SecurityEvent, SecuritySeverity};
use crate::utils::validation::validate_ip;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Duration;
use serde::Deserialize;
use serde_json::json;

const DEFAULT_EVENT_LIMIT: usize = 100;
const AUTO_BLOCK_WINDOW_HOURS: i64 = 1;
const AUTO_BLOCK_MINUTES: i64 = 60;
const SECURITY_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Deserialize)]
pub struct EventParams {
    pub severity: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BlockIpBody {
    pub ip: String,
    #[serde(default = "default_block_minutes")]
    pub duration_minutes: i64,
}

fn default_block_minutes() -> i64 {
    AUTO_BLOCK_MINUTES
}

#[derive(Debug, Deserialize)]
pub struct UnblockIpBody {
    pub ip: String,
}

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/security/events", get(list_events))
        .route("/security/stats", get(stats))
        .route("/security/rate-limit/{identifier}", get(rate_limit_info))
        .route("/security/block-ip", post(block_ip))
        .route("/security/unblock-ip", post(unblock_ip))
        .route("/security/cleanup", post(cleanup))
        .route("/security/auto-block", post(auto_block))
}

fn checked_ip(ip: &str) -> Result<String, ApiError> {
    let result = validate_ip(ip);
    if !result.is_valid {
        return Err(ApiError::BadRequest(result.message()));
    }
    Ok(result.sanitized.unwrap_or_else(|| ip.trim().to_string()))
}

async fn list_events(
    State(state): State<SharedState>,
    AdminUser(_): AdminUser,
    Query(params): Query<EventParams>,
) -> Result<impl IntoResponse, ApiError> {
    let severity = params
        .severity
        .as_deref()
        .map(str::parse::<SecuritySeverity>)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let limit = params.limit.unwrap_or(DEFAULT_EVENT_LIMIT).clamp(1, 1000);
    let events: Vec<SecurityEvent> = state.security.events(severity, None, limit);
    Ok(Json(json!({ "events": events, "count": events.len() })))
}

async fn stats(State(state): State<SharedState>, AdminUser(_): AdminUser) -> impl IntoResponse {
    Json(state.security.stats())
}

async fn rate_limit_info(
    State(state): State<SharedState>,
    AdminUser(_): AdminUser,
    Path(identifier): Path<String>,
    Query(params): Query<LimitParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit_name = params.limit_name.unwrap_or_else(|| "per_minute".to_string());
    let info = state
        .rate_limiter
        .get_limit_info(&limit_name, &identifier)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown rate limit: {}", limit_name)))?;
    Ok(Json(info))
}

async fn block_ip(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
    Json(body): Json<BlockIpBody>,
) -> Result<impl IntoResponse, ApiError> {
    let ip = checked_ip(&body.ip)?;
    if body.duration_minutes < 1 {
        return Err(ApiError::BadRequest("duration_minutes must be at least 1".to_string()));
    }
    state.security.block_ip(&ip, body.duration_minutes);
    tracing::info!("{} blocked {} for {} minutes", admin.username, ip, body.duration_minutes);
    Ok(Json(json!({
        "message": format!("IP {} blocked for {} minutes", ip, body.duration_minutes),
        "ip": ip,
        "duration_minutes": body.duration_minutes,
    })))
}

async fn unblock_ip(
    State(state): State<SharedState>,
    AdminUser(_): AdminUser,
    Json(body): Json<UnblockIpBody>,
) -> Result<impl IntoResponse, ApiError> {
    let ip = checked_ip(&body.ip)?;
    if !state.security.unblock_ip(&ip) {
        return Err(ApiError::NotFound(format!("IP {} is not blocked", ip)));
    }
    Ok(Json(json!({ "message": format!("IP {} unblocked", ip), "ip": ip })))
}

async fn cleanup(State(state): State<SharedState>, AdminUser(_): AdminUser) -> impl IntoResponse {
    let events = state.security.cleanup(SECURITY_RETENTION_DAYS);
    let rate_limits = state.rate_limiter.cleanup_old_data(3600.0);
    Json(json!({
        "message": "Security cleanup completed",
        "events_removed": events,
        "rate_limit_entries_removed": rate_limits,
    }))
}

async fn auto_block(State(state): State<SharedState>, AdminUser(_): AdminUser) -> impl IntoResponse {
    let blocked = state
        .security
        .auto_block(Duration::hours(AUTO_BLOCK_WINDOW_HOURS), AUTO_BLOCK_MINUTES);
    Json(json!({ "blocked_ips": blocked, "count": blocked.len() }))
}
