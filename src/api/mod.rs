//! HTTP, WebSocket and SSE surface

pub mod auth;
pub mod downloads;
pub mod drive;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod monitoring;
pub mod security;
pub mod sse;
pub mod temp_urls;
pub mod ws;

pub use error::ApiError;

use crate::app::SharedState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use tower_http::cors::CorsLayer;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Full application router, ready to serve
pub fn router(state: SharedState) -> Router {
    let prefix = state.settings.api_prefix.trim_end_matches('/').to_string();

    let api = Router::new()
        .merge(downloads::router())
        .merge(temp_urls::router())
        .merge(sse::router())
        .merge(auth::router())
        .merge(drive::router())
        .merge(monitoring::router())
        .merge(security::router())
        .merge(ws::router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ));

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health));
    let app = if prefix.is_empty() {
        app.merge(api)
    } else {
        app.nest(&prefix, api)
    };

    app.fallback(not_found)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::log_requests,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "message": format!("Welcome to {}", state.settings.project_name),
        "version": VERSION,
        "docs": format!("{}/docs", state.settings.api_prefix),
    }))
}

async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "service": state.settings.project_name,
        "version": VERSION,
    }))
}

async fn not_found() -> ApiError {
    ApiError::NotFound("Not found".to_string())
}
