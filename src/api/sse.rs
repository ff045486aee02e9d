//! Server-sent event streams for download progress and dashboards

use super::downloads::load_download;
use super::error::ApiError;
use crate::app::SharedState;
use crate::domain::{Download, DownloadStatus};
use crate::notify::{Channel, Filter};
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;

const QUEUE_INTERVAL: Duration = Duration::from_secs(5);
const STATS_INTERVAL: Duration = Duration::from_secs(10);
const DASHBOARD_INTERVAL: Duration = Duration::from_secs(3);
const DASHBOARD_DOWNLOADS: i64 = 50;
const EVENT_BUFFER: usize = 32;

type EventStream = Sse<axum::response::sse::KeepAliveStream<ReceiverStream<Result<Event, Infallible>>>>;

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/downloads/{id}/stream", get(download_stream))
        .route("/downloads/queue/stream", get(queue_stream))
        .route("/downloads/stats/stream", get(stats_stream))
        .route("/downloads/dashboard/stream", get(dashboard_stream))
}

fn event(value: Value) -> Result<Event, Infallible> {
    Ok(Event::default().data(value.to_string()))
}

fn connection_established(stream: &str, download_id: Option<Uuid>) -> Value {
    json!({
        "type": "connection_established",
        "stream": stream,
        "download_id": download_id,
        "timestamp": Utc::now(),
    })
}

/// Terminal event for a finished download, if it is finished
fn final_event(download_id: Uuid, status: &str, data: &Value) -> Option<Value> {
    let kind = match status {
        "completed" => "download_completed",
        "failed" => "download_failed",
        _ => return None,
    };
    Some(json!({
        "type": kind,
        "download_id": download_id,
        "data": data,
        "timestamp": Utc::now(),
    }))
}

fn sse(rx: mpsc::Receiver<Result<Event, Infallible>>) -> EventStream {
    Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default())
}

async fn download_stream(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<EventStream, ApiError> {
    // Subscribe before reading the row so a transition in between is buffered
    let mut subscription = state.hub.subscribe(Filter::Channel(Channel::Download(id)));
    let download = load_download(&state, id).await?;
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);

    tokio::spawn(async move {
        let _guard = state.hub.connect(Channel::Download(id));

        if tx.send(event(connection_established("download", Some(id)))).await.is_err() {
            return;
        }
        let current = progress_payload(&download);
        if tx.send(event(current.clone())).await.is_err() {
            return;
        }
        if let Some(done) = final_event(id, download.status.as_str(), &current["data"]) {
            let _ = tx.send(event(done)).await;
            return;
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                notification = subscription.recv() => {
                    let Some(notification) = notification else { break };
                    let update = json!({
                        "type": "progress_update",
                        "download_id": id,
                        "data": notification.data,
                        "timestamp": notification.timestamp,
                    });
                    if tx.send(event(update)).await.is_err() {
                        break;
                    }
                    let status = notification.data["status"].as_str().unwrap_or_default();
                    if let Some(done) = final_event(id, status, &notification.data) {
                        let _ = tx.send(event(done)).await;
                        break;
                    }
                }
            }
        }
        debug!("Download stream for {} closed", id);
    });

    Ok(sse(rx))
}

fn progress_payload(download: &Download) -> Value {
    json!({
        "type": "progress_update",
        "download_id": download.id,
        "data": {
            "download_id": download.id,
            "status": download.status,
            "progress": download.progress,
            "title": download.title,
            "thumbnail": download.thumbnail,
            "file_size": download.file_size,
            "error": download.error_message,
        },
        "timestamp": Utc::now(),
    })
}

/// Emit `connection_established`, then whatever `tick` yields every `period`
fn periodic<F, Fut>(name: &'static str, channel: Channel, period: Duration, state: SharedState, tick: F) -> EventStream
where
    F: Fn(SharedState) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(async move {
        let _guard = state.hub.connect(channel);
        if tx.send(event(connection_established(name, None))).await.is_err() {
            return;
        }
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                _ = ticker.tick() => match tick(state.clone()).await {
                    Ok(payload) => {
                        if tx.send(event(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("{} stream update failed: {}", name, e),
                },
            }
        }
        debug!("{} stream closed", name);
    });
    sse(rx)
}

async fn queue_stream(State(state): State<SharedState>) -> EventStream {
    periodic("queue", Channel::Queue, QUEUE_INTERVAL, state, |state| async move {
        let snapshot = state.queue.queue_snapshot().await?;
        Ok(json!({ "type": "queue_update", "data": snapshot, "timestamp": Utc::now() }))
    })
}

async fn stats_stream(State(state): State<SharedState>) -> EventStream {
    periodic("stats", Channel::Stats, STATS_INTERVAL, state, |state| async move {
        let stats = state.db.download_stats().await?;
        Ok(json!({ "type": "stats_update", "data": stats, "timestamp": Utc::now() }))
    })
}

async fn dashboard_stream(State(state): State<SharedState>) -> EventStream {
    periodic("dashboard", Channel::Dashboard, DASHBOARD_INTERVAL, state, |state| async move {
        let in_progress = state
            .db
            .list_downloads(Some(DownloadStatus::Downloading), DASHBOARD_DOWNLOADS, 0)
            .await?;
        let queue = state.queue.queue_snapshot().await?;
        let stats = state.db.download_stats().await?;
        Ok(json!({
            "type": "dashboard_update",
            "data": {
                "downloads_in_progress": in_progress.downloads,
                "queue": queue,
                "system": {
                    "downloads": stats,
                    "connections": state.hub.connection_counts(),
                    "monitoring": state.monitoring.summary(),
                },
            },
            "timestamp": Utc::now(),
        }))
    })
}
