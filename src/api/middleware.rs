//! Request logging and per-client rate limiting

use super::error::ApiError;
use super::extract::client_ip;
use crate::app::SharedState;
use crate::monitoring::Metric;
use crate::security::{SecurityEvent, SecuritySeverity};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{info, warn};

const LIMITS: [&str; 2] = ["per_minute", "per_hour"];

/// Reject blocked addresses and clients over the minute or hour budget
pub async fn rate_limit(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(request.headers(), peer);

    if state.security.is_ip_blocked(&ip) {
        return Err(ApiError::Forbidden("IP address is blocked".to_string()));
    }

    let (rejected, result) = state.rate_limiter.check_limits(&LIMITS, &ip);
    if let Some(limit) = rejected {
        warn!("Rate limit {} exceeded for {}", limit, ip);
        state.security.log_event(
            SecurityEvent::new("rate_limit_exceeded", SecuritySeverity::Medium, &ip)
                .with_resource(request.uri().path())
                .with_details(serde_json::json!({ "limit": limit })),
        );
        let retry_after_secs = result.retry_after_secs();
        return Err(ApiError::TooManyRequests {
            message: format!("Rate limit exceeded. Try again in {} seconds.", retry_after_secs),
            retry_after_secs,
        });
    }

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert("x-ratelimit-remaining", HeaderValue::from(result.remaining));
    Ok(response)
}

/// Log every request and feed its duration into the `response_time` metric
pub async fn log_requests(State(state): State<SharedState>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    let status = response.status();
    info!("{} {} {} {:.1}ms", method, path, status.as_u16(), elapsed_ms);

    state
        .monitoring
        .record(
            Metric::gauge("response_time", elapsed_ms)
                .with_label("method", method.as_str())
                .with_label("path", path)
                .with_label("status", status.as_u16().to_string()),
        )
        .await;
    response
}
