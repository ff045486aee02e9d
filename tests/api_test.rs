//! HTTP surface tests driven through the router with `oneshot`

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::{test_state, test_state_with, FakeExtractor, Script};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use tubeload::domain::{Download, DownloadQuality, DownloadStatus};
use tubeload::{api, SharedState};
use uuid::Uuid;

const URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

async fn setup(dir: &TempDir) -> (SharedState, Router) {
    let state = test_state(dir, FakeExtractor::new(vec![Script::Succeed])).await;
    let app = api::router(state.clone());
    (state, app)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn get_as(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn register_and_login(app: &Router, username: &str) -> String {
    let (status, _) = send(
        app,
        post_json(
            "/api/v1/auth/register",
            json!({ "username": username, "email": format!("{}@example.com", username), "password": "s3cret-pass" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    login(app, username, "s3cret-pass").await
}

async fn login(app: &Router, username: &str, password: &str) -> String {
    let (status, body) = send(
        app,
        post_json("/api/v1/auth/login", json!({ "username": username, "password": password })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {}", body);
    body["access_token"].as_str().unwrap().to_string()
}

// ── Service endpoints ────────────────────────────────────────────────

#[tokio::test]
async fn root_and_health() {
    let dir = TempDir::new().unwrap();
    let (_, app) = setup(&dir).await;

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());

    let (status, body) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().unwrap().contains("tubeload"));
}

#[tokio::test]
async fn unknown_route_is_json_404() {
    let dir = TempDir::new().unwrap();
    let (_, app) = setup(&dir).await;
    let (status, body) = send(&app, get("/api/v1/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"].is_string());
}

// ── Downloads ────────────────────────────────────────────────────────

#[tokio::test]
async fn create_download_deduplicates_by_url() {
    let dir = TempDir::new().unwrap();
    let (_, app) = setup(&dir).await;

    let (status, first) = send(&app, post_json("/api/v1/downloads/sync", json!({ "url": URL }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["status"], "pending");
    assert_eq!(first["url"], URL);

    let (_, second) = send(&app, post_json("/api/v1/downloads/sync", json!({ "url": URL }))).await;
    assert_eq!(first["id"], second["id"]);

    let (status, list) = send(&app, get("/api/v1/downloads")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total"], 1);
    assert_eq!(list["limit"], 20);
}

#[tokio::test]
async fn invalid_urls_are_rejected() {
    let dir = TempDir::new().unwrap();
    let (_, app) = setup(&dir).await;

    let (status, body) = send(
        &app,
        post_json("/api/v1/downloads/sync", json!({ "url": "https://www.youtube.com/feed/trending" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().starts_with("Invalid URL"));
}

#[tokio::test]
async fn batch_returns_deduplicated_downloads() {
    let dir = TempDir::new().unwrap();
    let (state, app) = setup(&dir).await;

    let (status, body) = send(
        &app,
        post_json(
            "/api/v1/downloads/batch",
            json!({ "urls": [URL, URL, "https://youtu.be/9bZkp7q19f0"] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let downloads = body.as_array().expect("list of downloads");
    assert_eq!(downloads.len(), 2);
    assert!(downloads.iter().all(|d| d["status"] == "pending"));

    // Resubmitting returns the existing rows instead of new ones
    let (status, again) = send(&app, post_json("/api/v1/downloads/batch", json!({ "urls": [URL] }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again[0]["id"], downloads[0]["id"]);
    assert_eq!(state.db.download_stats().await.unwrap().total, 2);

    let (status, _) = send(&app, post_json("/api/v1/downloads/batch", json!({ "urls": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn batch_with_an_invalid_url_creates_nothing() {
    let dir = TempDir::new().unwrap();
    let (state, app) = setup(&dir).await;

    let (status, body) = send(
        &app,
        post_json(
            "/api/v1/downloads/batch",
            json!({ "urls": [URL, "https://youtu.be/9bZkp7q19f0", "ftp://nope"] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().starts_with("Invalid URL"));
    assert_eq!(state.db.download_stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn list_validates_paging_and_status() {
    let dir = TempDir::new().unwrap();
    let (_, app) = setup(&dir).await;

    let (status, _) = send(&app, get("/api/v1/downloads?limit=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, get("/api/v1/downloads?limit=101")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, get("/api/v1/downloads?status=sleeping")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, body) = send(&app, get("/api/v1/downloads?status=pending&limit=5")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["limit"], 5);
}

#[tokio::test]
async fn missing_download_is_404() {
    let dir = TempDir::new().unwrap();
    let (_, app) = setup(&dir).await;
    let id = Uuid::new_v4();

    let (status, _) = send(&app, get(&format!("/api/v1/downloads/{}", id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, get(&format!("/api/v1/downloads/{}/file", id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, get(&format!("/api/v1/downloads/{}/stream", id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stream_sees_a_transition_right_after_connect() {
    let dir = TempDir::new().unwrap();
    let (state, app) = setup(&dir).await;
    let download = Download::new(URL, DownloadQuality::Best);
    state.db.create_download(&download).await.unwrap();

    let response = app
        .clone()
        .oneshot(get(&format!("/api/v1/downloads/{}/stream", download.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Nothing has been polled yet; the stream must still see this
    state
        .hub
        .notify_download_completed(download.id, Some("Test Clip"), None, Some(18), Some("mp4"));

    let bytes = tokio::time::timeout(std::time::Duration::from_secs(5), response.into_body().collect())
        .await
        .expect("stream closed after the terminal event")
        .unwrap()
        .to_bytes();
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("connection_established"));
    assert!(text.contains("download_completed"));
}

#[tokio::test]
async fn retry_requires_failed_download() {
    let dir = TempDir::new().unwrap();
    let (_, app) = setup(&dir).await;
    let (_, created) = send(&app, post_json("/api/v1/downloads/sync", json!({ "url": URL }))).await;
    let id = created["id"].as_str().unwrap();

    let (status, _) = send(&app, post_json(&format!("/api/v1/downloads/{}/retry", id), json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn completed_file_is_served_and_shared() {
    let dir = TempDir::new().unwrap();
    let (state, app) = setup(&dir).await;
    let (_, created) = send(&app, post_json("/api/v1/downloads/sync", json!({ "url": URL }))).await;
    let id: Uuid = created["id"].as_str().unwrap().parse().unwrap();

    // Not finished yet
    let (status, _) = send(&app, get(&format!("/api/v1/downloads/{}/file", id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    state.queue.run_download(id).await;

    let response = app
        .clone()
        .oneshot(get(&format!("/api/v1/downloads/{}/file", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    assert!(response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .starts_with("attachment"));
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"not really a video");

    let download = state.db.get_download(id).await.unwrap().unwrap();
    assert_eq!(download.status, DownloadStatus::Completed);
    assert_eq!(download.downloads_count, 1);

    let (status, temp) = send(
        &app,
        post_json(
            &format!("/api/v1/downloads/{}/temp", id),
            json!({ "expiration_hours": 2, "max_accesses": 1, "custom_filename": "clip.mp4" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = temp["token"].as_str().unwrap().to_string();
    assert!(temp["temporary_url"].as_str().unwrap().contains(&token));

    let shared = format!("/api/v1/downloads/{}/temp/{}", id, token);
    let response = app.clone().oneshot(get(&shared)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("clip.mp4"));

    // Single-use link
    let (status, _) = send(&app, get(&shared)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, get(&format!("/api/v1/downloads/{}/temp/bogus", id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_removes_row_and_file() {
    let dir = TempDir::new().unwrap();
    let (state, app) = setup(&dir).await;
    let (_, created) = send(&app, post_json("/api/v1/downloads/sync", json!({ "url": URL }))).await;
    let id: Uuid = created["id"].as_str().unwrap().parse().unwrap();
    state.queue.run_download(id).await;
    let path = state.db.get_download(id).await.unwrap().unwrap().file_path.unwrap();

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/v1/downloads/{}", id))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(state.db.get_download(id).await.unwrap().is_none());
    assert!(!std::path::Path::new(&path).exists());
}

// ── Accounts ─────────────────────────────────────────────────────────

#[tokio::test]
async fn register_login_and_me() {
    let dir = TempDir::new().unwrap();
    let (_, app) = setup(&dir).await;
    let token = register_and_login(&app, "alice").await;

    let (status, me) = send(&app, get_as("/api/v1/auth/me", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["username"], "alice");
    assert!(me.get("hashed_password").is_none());
    assert!(me.get("salt").is_none());

    let (status, _) = send(&app, get("/api/v1/auth/me")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&app, get_as("/api/v1/auth/me", "garbage")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let dir = TempDir::new().unwrap();
    let (_, app) = setup(&dir).await;
    register_and_login(&app, "bob").await;

    let (status, _) = send(
        &app,
        post_json(
            "/api/v1/auth/register",
            json!({ "username": "bob", "email": "other@example.com", "password": "s3cret-pass" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let dir = TempDir::new().unwrap();
    let (_, app) = setup(&dir).await;
    register_and_login(&app, "carol").await;

    let (status, _) = send(
        &app,
        post_json("/api/v1/auth/login", json!({ "username": "carol", "password": "wrong-pass" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_routes_require_admin() {
    let dir = TempDir::new().unwrap();
    let (state, app) = setup(&dir).await;
    let user_token = register_and_login(&app, "dave").await;

    let (status, _) = send(&app, get_as("/api/v1/auth/users", &user_token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&app, get_as("/api/v1/security/stats", &user_token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    state
        .auth
        .bootstrap_admin("root", "root@example.com", "admin-pass-1")
        .await
        .unwrap();
    let admin_token = login(&app, "root", "admin-pass-1").await;

    let (status, stats) = send(&app, get_as("/api/v1/auth/users/stats", &admin_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_users"], 2);

    let (status, _) = send(&app, get_as("/api/v1/security/stats", &admin_token)).await;
    assert_eq!(status, StatusCode::OK);
}

// ── Monitoring and security ──────────────────────────────────────────

#[tokio::test]
async fn monitoring_rejects_unknown_severity() {
    let dir = TempDir::new().unwrap();
    let (_, app) = setup(&dir).await;

    let (status, _) = send(&app, get("/api/v1/monitoring/alerts?severity=apocalyptic")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, body) = send(&app, get("/api/v1/monitoring/alerts?severity=critical")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn health_checks_report_registered_components() {
    let dir = TempDir::new().unwrap();
    let (_, app) = setup(&dir).await;

    let (status, body) = send(&app, post_json("/api/v1/monitoring/health/check", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    for component in ["database", "storage", "queue"] {
        assert_eq!(body["checks"][component]["status"], "healthy", "{}", body);
    }
}

#[tokio::test]
async fn blocked_ip_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (state, app) = setup(&dir).await;
    state.security.block_ip("203.0.113.9", 5);

    let request = Request::builder()
        .uri("/api/v1/downloads")
        .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Outside the prefix nothing is rate limited
    let request = Request::builder()
        .uri("/health")
        .header("x-forwarded-for", "203.0.113.9")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn websocket_connection_counts_start_empty() {
    let dir = TempDir::new().unwrap();
    let (_, app) = setup(&dir).await;
    let (status, body) = send(&app, get("/api/v1/ws/connections")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
}

fn get_from(uri: &str, ip: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-forwarded-for", ip)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn hourly_rejection_does_not_spend_the_minute_budget() {
    let dir = TempDir::new().unwrap();
    let state = test_state_with(&dir, FakeExtractor::new(vec![]), |s| {
        s.rate_limit_per_minute = 5;
        s.rate_limit_per_hour = 2;
    })
    .await;
    let app = api::router(state.clone());
    let ip = "203.0.113.7";

    for _ in 0..2 {
        let response = app.clone().oneshot(get_from("/api/v1/downloads", ip)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    for _ in 0..3 {
        let response = app.clone().oneshot(get_from("/api/v1/downloads", ip)).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    let minute = state.rate_limiter.get_limit_info("per_minute", ip).unwrap();
    assert_eq!(minute.current_usage, 2.0);
    assert_eq!(minute.remaining, 3);

    // Other clients are unaffected
    let response = app
        .clone()
        .oneshot(get_from("/api/v1/downloads", "198.51.100.1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn temporary_link_requests_are_rate_limited() {
    let dir = TempDir::new().unwrap();
    let (_, app) = setup(&dir).await;
    let id = Uuid::new_v4();
    let link = format!("/api/v1/downloads/{}/temp/guess", id);

    for _ in 0..10 {
        let response = app.clone().oneshot(get_from(&link, "203.0.113.9")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
    let response = app.clone().oneshot(get_from(&link, "203.0.113.9")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));

    let response = app.clone().oneshot(get_from(&link, "203.0.113.10")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

