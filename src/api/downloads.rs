//! Download submission, listing and file delivery

use super::error::ApiError;
use super::extract::MaybeUser;
use crate::app::SharedState;
use crate::domain::{Download, DownloadQuality, DownloadStatus, StorageType};
use crate::utils::validation::validate_url;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::path::Path as FsPath;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use uuid::Uuid;

const MAX_BATCH_URLS: usize = 10;
const MAX_PAGE_SIZE: i64 = 100;
const DEFAULT_PAGE_SIZE: i64 = 20;

// ── Request types ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DownloadRequestBody {
    pub url: String,
    #[serde(default)]
    pub quality: Option<DownloadQuality>,
    #[serde(default)]
    pub storage_type: Option<StorageType>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequestBody {
    pub urls: Vec<String>,
    #[serde(default)]
    pub quality: Option<DownloadQuality>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/downloads", get(list_downloads))
        .route("/downloads/sync", post(create_download))
        .route("/downloads/batch", post(create_batch))
        .route("/downloads/stats/summary", get(download_stats))
        .route("/downloads/queue/process", post(process_queue))
        .route("/downloads/{id}", get(get_download).delete(delete_download))
        .route("/downloads/{id}/retry", post(retry_download))
        .route("/downloads/{id}/file", get(download_file))
        .route("/downloads/{id}/upload", post(upload_download))
}

// ── Helpers ───────────────────────────────────────────────────────────

fn checked_url(url: &str) -> Result<String, String> {
    let result = validate_url(url);
    if !result.is_valid {
        return Err(format!("Invalid URL: {}", result.message()));
    }
    Ok(result.sanitized.unwrap_or_else(|| url.trim().to_string()))
}

/// Existing row for `url`, or a freshly created pending one
async fn find_or_create(
    state: &SharedState,
    url: String,
    quality: DownloadQuality,
    storage_type: StorageType,
    user_id: Option<Uuid>,
) -> Result<(Download, bool), ApiError> {
    if let Some(existing) = state.db.get_download_by_url(&url).await? {
        return Ok((existing, false));
    }
    let mut download = Download::new(url, quality);
    download.storage_type = storage_type;
    download.user_id = user_id;
    state.db.create_download(&download).await?;
    info!("Created download {} for {}", download.id, download.url);
    Ok((download, true))
}

pub(super) async fn load_download(state: &SharedState, id: Uuid) -> Result<Download, ApiError> {
    state
        .db
        .get_download(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Download not found".to_string()))
}

/// Stream a file from disk as an attachment
pub(super) async fn file_response(path: &FsPath, filename: Option<&str>) -> Result<Response, ApiError> {
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound("File not found on server".to_string()))
        }
        Err(e) => return Err(ApiError::Internal(format!("Failed to open file: {}", e))),
    };
    let length = file.metadata().await.ok().map(|m| m.len());

    let name = filename
        .map(str::to_string)
        .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "download".to_string());
    let mime = mime_guess::from_path(path).first_or_octet_stream();

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", name.replace('"', "'"))) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Some(length) = length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    Ok(response)
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn create_download(
    State(state): State<SharedState>,
    MaybeUser(user): MaybeUser,
    Json(body): Json<DownloadRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let url = checked_url(&body.url).map_err(ApiError::BadRequest)?;
    let (download, created) = find_or_create(
        &state,
        url,
        body.quality.unwrap_or_default(),
        body.storage_type.unwrap_or_default(),
        user.map(|u| u.id),
    )
    .await?;
    if created {
        state.queue.enqueue(download.id);
    }
    Ok(Json(download))
}

async fn create_batch(
    State(state): State<SharedState>,
    MaybeUser(user): MaybeUser,
    Json(body): Json<BatchRequestBody>,
) -> Result<Json<Vec<Download>>, ApiError> {
    if body.urls.is_empty() || body.urls.len() > MAX_BATCH_URLS {
        return Err(ApiError::BadRequest(format!(
            "Between 1 and {} URLs are required",
            MAX_BATCH_URLS
        )));
    }

    // Reject the whole batch before creating anything
    let urls = body
        .urls
        .iter()
        .map(|raw| checked_url(raw).map_err(|e| ApiError::BadRequest(format!("{} ({})", e, raw))))
        .collect::<Result<Vec<_>, _>>()?;

    let quality = body.quality.unwrap_or_default();
    let user_id = user.map(|u| u.id);
    let mut seen = HashSet::new();
    let mut downloads = Vec::new();

    for url in urls {
        if !seen.insert(url.clone()) {
            continue;
        }
        let (download, created) = find_or_create(&state, url, quality, StorageType::default(), user_id).await?;
        if created {
            state.queue.enqueue(download.id);
        }
        downloads.push(download);
    }

    Ok(Json(downloads))
}

async fn list_downloads(
    State(state): State<SharedState>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(ApiError::BadRequest(format!("limit must be between 1 and {}", MAX_PAGE_SIZE)));
    }
    let offset = params.offset.unwrap_or(0).max(0);
    let status = params
        .status
        .as_deref()
        .map(str::parse::<DownloadStatus>)
        .transpose()
        .map_err(ApiError::BadRequest)?;

    let page = state.db.list_downloads(status, limit, offset).await?;
    Ok(Json(json!({
        "downloads": page.downloads,
        "total": page.total,
        "limit": limit,
        "offset": offset,
    })))
}

async fn get_download(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(load_download(&state, id).await?))
}

async fn download_stats(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.db.download_stats().await?))
}

async fn delete_download(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let download = load_download(&state, id).await?;
    if state.queue.is_active(id) || download.status == DownloadStatus::Pending {
        state.queue.cancel(id).await?;
    }
    if let Some(path) = &download.file_path {
        if let Err(e) = crate::storage::FileStorage::remove_file_if_exists(FsPath::new(path)).await {
            warn!("Failed to remove {}: {}", path, e);
        }
    }
    state.db.delete_download(id).await?;
    info!("Deleted download {}", id);
    Ok(Json(json!({ "message": "Download deleted", "id": id })))
}

async fn retry_download(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let mut download = load_download(&state, id).await?;
    if download.status != DownloadStatus::Failed {
        return Err(ApiError::BadRequest("Only failed downloads can be retried".to_string()));
    }
    download.reset_for_retry();
    state.db.update_download(&download).await?;
    state.queue.enqueue(id);
    Ok(Json(download))
}

async fn process_queue(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let started = state.queue.process_pending().await?;
    let message = match started {
        Some(_) => "Queue processing started",
        None => "No pending downloads",
    };
    Ok(Json(json!({ "message": message, "download_id": started })))
}

async fn download_file(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let mut download = load_download(&state, id).await?;
    let path = match (&download.file_path, download.status) {
        (Some(path), DownloadStatus::Completed | DownloadStatus::UploadedToDrive) => path.clone(),
        _ => return Err(ApiError::NotFound("File is not available".to_string())),
    };
    let response = file_response(FsPath::new(&path), None).await?;

    download.mark_accessed();
    state.db.update_download(&download).await?;
    Ok(response)
}

async fn upload_download(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let relay = state
        .relay
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("No relay endpoint configured".to_string()))?;
    let remote_id = relay.relay(id).await?;
    Ok((
        StatusCode::OK,
        Json(json!({ "download_id": id, "drive_file_id": remote_id })),
    ))
}
