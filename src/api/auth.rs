//! Account endpoints

use super::error::ApiError;
use super::extract::{AdminUser, AuthUser, ClientIp};
use crate::app::SharedState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    /// Username or email
    pub username: String,
    pub password: String,
    /// Token lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ProfileBody {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordBody {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me).put(update_me))
        .route("/auth/change-password", post(change_password))
        .route("/auth/users", get(list_users))
        .route("/auth/users/stats", get(user_stats))
        .route("/auth/users/{id}/toggle-status", post(toggle_status))
        .route("/auth/users/{id}/make-admin", post(make_admin))
        .route("/auth/users/{id}", delete(delete_user))
}

async fn register(
    State(state): State<SharedState>,
    Json(body): Json<RegisterBody>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .auth
        .register(&body.username, &body.email, &body.password, body.full_name)
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn login(
    State(state): State<SharedState>,
    ClientIp(ip): ClientIp,
    Json(body): Json<LoginBody>,
) -> Result<impl IntoResponse, ApiError> {
    let attempt = state.rate_limiter.check_limit("login", &ip);
    if !attempt.allowed {
        return Err(ApiError::TooManyRequests {
            message: "Too many login attempts".to_string(),
            retry_after_secs: attempt.retry_after_secs(),
        });
    }
    let response = state
        .auth
        .login(&body.username, &body.password, &ip, body.expires_in)
        .await?;
    Ok(Json(response))
}

async fn logout(
    State(state): State<SharedState>,
    ClientIp(ip): ClientIp,
    AuthUser(user): AuthUser,
) -> impl IntoResponse {
    state.auth.logout(&user, &ip).await;
    Json(json!({ "message": "Successfully logged out" }))
}

async fn me(AuthUser(user): AuthUser) -> impl IntoResponse {
    Json(user)
}

async fn update_me(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Json(body): Json<ProfileBody>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = state.auth.update_profile(&user, body.full_name, body.email).await?;
    Ok(Json(updated))
}

async fn change_password(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Json(body): Json<ChangePasswordBody>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .auth
        .change_password(&user, &body.current_password, &body.new_password)
        .await?;
    Ok(Json(json!({ "message": "Password changed successfully" })))
}

async fn list_users(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, ApiError> {
    let skip = params.skip.unwrap_or(0).max(0);
    let limit = params.limit.unwrap_or(100).clamp(1, 1000);
    Ok(Json(state.auth.list_users(&admin, skip, limit).await?))
}

async fn user_stats(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.auth.user_stats(&admin).await?))
}

async fn toggle_status(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.auth.toggle_user_status(&admin, id).await?))
}

async fn make_admin(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.auth.make_admin(&admin, id).await?))
}

async fn delete_user(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.auth.delete_user(&admin, id).await?;
    Ok(Json(json!({ "message": "User deleted", "id": id })))
}
