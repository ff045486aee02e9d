//! Expiring download links

use super::downloads::{file_response, load_download};
use super::error::ApiError;
use super::extract::ClientIp;
use crate::app::SharedState;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::path::Path as FsPath;
use uuid::Uuid;

const ACCESS_LOG_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct CreateTempUrlBody {
    #[serde(default = "default_hours")]
    pub expiration_hours: i64,
    #[serde(default)]
    pub max_accesses: Option<i64>,
    #[serde(default)]
    pub custom_filename: Option<String>,
}

fn default_hours() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct ExtendParams {
    #[serde(default = "default_hours")]
    pub hours: i64,
}

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/downloads/temp/cleanup", post(cleanup_expired))
        .route("/downloads/{id}/temp", post(create_temp_url))
        .route("/downloads/{id}/temp-logs", get(access_logs))
        .route("/downloads/{id}/temp/{token}", get(serve_temp_file).delete(revoke_temp_url))
        .route("/downloads/{id}/temp/{token}/info", get(temp_url_info))
        .route("/downloads/{id}/temp/{token}/extend", post(extend_temp_url))
}

async fn create_temp_url(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    body: Option<Json<CreateTempUrlBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or(CreateTempUrlBody {
        expiration_hours: default_hours(),
        max_accesses: None,
        custom_filename: None,
    });
    if body.expiration_hours < 1 {
        return Err(ApiError::BadRequest("expiration_hours must be at least 1".to_string()));
    }

    let download = load_download(&state, id).await?;
    let path = download
        .file_path
        .ok_or_else(|| ApiError::NotFound("Download has no file".to_string()))?;

    let temp = state
        .temp_urls
        .generate(
            id,
            FsPath::new(&path),
            body.expiration_hours,
            body.max_accesses,
            body.custom_filename,
        )
        .await?;

    Ok(Json(json!({
        "temporary_url": temp.temporary_url,
        "token": temp.token,
        "expiration_time": temp.expiration_time,
        "max_accesses": temp.max_accesses,
        "download_id": id,
    })))
}

async fn serve_temp_file(
    State(state): State<SharedState>,
    ClientIp(ip): ClientIp,
    Path((id, token)): Path<(Uuid, String)>,
) -> Result<Response, ApiError> {
    let attempt = state.rate_limiter.check_limit("temp_url", &ip);
    if !attempt.allowed {
        return Err(ApiError::TooManyRequests {
            message: "Too many temporary URL requests".to_string(),
            retry_after_secs: attempt.retry_after_secs(),
        });
    }
    let temp = state.temp_urls.validate(id, &token).await?;
    file_response(FsPath::new(&temp.file_path), temp.custom_filename.as_deref()).await
}

async fn temp_url_info(
    State(state): State<SharedState>,
    Path((id, token)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.temp_urls.info(id, &token).await?))
}

async fn extend_temp_url(
    State(state): State<SharedState>,
    Path((id, token)): Path<(Uuid, String)>,
    Query(params): Query<ExtendParams>,
) -> Result<impl IntoResponse, ApiError> {
    if params.hours < 1 {
        return Err(ApiError::BadRequest("hours must be at least 1".to_string()));
    }
    let temp = state.temp_urls.extend(id, &token, params.hours).await?;
    Ok(Json(json!({
        "message": format!("Temporary URL extended by {} hours", params.hours),
        "expiration_time": temp.expiration_time,
    })))
}

async fn revoke_temp_url(
    State(state): State<SharedState>,
    Path((id, token)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.temp_urls.revoke(id, &token).await? {
        return Err(ApiError::NotFound("Temporary URL not found".to_string()));
    }
    Ok(Json(json!({ "message": "Temporary URL revoked" })))
}

async fn access_logs(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let logs = state.temp_urls.access_logs(id, ACCESS_LOG_LIMIT).await?;
    Ok(Json(json!({ "download_id": id, "logs": logs })))
}

async fn cleanup_expired(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let cleaned = state.temp_urls.cleanup_expired().await?;
    Ok(Json(json!({ "message": "Cleanup completed", "cleaned": cleaned })))
}
