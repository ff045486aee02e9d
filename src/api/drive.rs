//! Per-user cloud relay configuration

use super::error::ApiError;
use super::extract::AuthUser;
use crate::app::SharedState;
use crate::domain::{DriveStatus, GoogleDriveConfig, User};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateConfigBody {
    pub credentials: Value,
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub custom_key: Option<String>,
    #[serde(default)]
    pub quota_limit: Option<i64>,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateConfigBody {
    #[serde(default)]
    pub credentials: Option<Value>,
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub custom_key: Option<String>,
    #[serde(default)]
    pub quota_limit: Option<i64>,
    #[serde(default)]
    pub status: Option<DriveStatus>,
    #[serde(default)]
    pub is_default: Option<bool>,
}

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/drive/config", get(list_configs).post(create_config))
        .route(
            "/drive/config/{id}",
            get(get_config).put(update_config).delete(delete_config),
        )
}

/// Credentials are never echoed back
fn config_view(c: &GoogleDriveConfig) -> Value {
    json!({
        "id": c.id,
        "user_id": c.user_id,
        "folder_id": c.folder_id,
        "custom_key": c.custom_key,
        "status": c.status,
        "created_at": c.created_at,
        "updated_at": c.updated_at,
        "last_sync": c.last_sync,
        "error_message": c.error_message,
        "quota_used": c.quota_used,
        "quota_limit": c.quota_limit,
        "quota_percentage": c.quota_percentage(),
        "is_default": c.is_default,
        "is_valid": c.is_valid(),
    })
}

async fn owned_config(state: &SharedState, user: &User, id: Uuid) -> Result<GoogleDriveConfig, ApiError> {
    match state.db.get_drive_config(id).await? {
        Some(config) if config.user_id == user.id || user.is_admin() => Ok(config),
        _ => Err(ApiError::NotFound("Drive configuration not found".to_string())),
    }
}

async fn create_config(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Json(body): Json<CreateConfigBody>,
) -> Result<impl IntoResponse, ApiError> {
    if state.db.get_drive_config_for_user(user.id).await?.is_some() {
        return Err(ApiError::BadRequest(
            "User already has a drive configuration".to_string(),
        ));
    }
    let mut config = GoogleDriveConfig::new(user.id, body.credentials);
    config.folder_id = body.folder_id;
    config.custom_key = body.custom_key;
    config.quota_limit = body.quota_limit;
    config.is_default = body.is_default;
    state.db.create_drive_config(&config).await?;
    info!("Created drive config {} for {}", config.id, user.username);
    Ok((StatusCode::CREATED, Json(config_view(&config))))
}

async fn list_configs(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let configs: Vec<GoogleDriveConfig> = if user.is_admin() {
        state.db.list_drive_configs(0, 1000).await?
    } else {
        state.db.get_drive_config_for_user(user.id).await?.into_iter().collect()
    };
    let views: Vec<Value> = configs.iter().map(config_view).collect();
    Ok(Json(views))
}

async fn get_config(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let config = owned_config(&state, &user, id).await?;
    Ok(Json(config_view(&config)))
}

async fn update_config(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateConfigBody>,
) -> Result<impl IntoResponse, ApiError> {
    let mut config = owned_config(&state, &user, id).await?;
    if let Some(credentials) = body.credentials {
        config.credentials = credentials;
    }
    if body.folder_id.is_some() {
        config.folder_id = body.folder_id;
    }
    if body.custom_key.is_some() {
        config.custom_key = body.custom_key;
    }
    if body.quota_limit.is_some() {
        config.quota_limit = body.quota_limit;
    }
    if let Some(is_default) = body.is_default {
        config.is_default = is_default;
    }
    match body.status {
        Some(DriveStatus::Active) => config.activate(),
        Some(DriveStatus::Inactive) => config.deactivate(),
        Some(other) => config.status = other,
        None => {}
    }
    config.updated_at = Utc::now();
    state.db.update_drive_config(&config).await?;
    Ok(Json(config_view(&config)))
}

async fn delete_config(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let config = owned_config(&state, &user, id).await?;
    state.db.delete_drive_config(config.id).await?;
    Ok(Json(json!({ "message": "Drive configuration deleted", "id": id })))
}
