//! WebSocket push channels

use crate::app::SharedState;
use crate::notify::{Channel, Filter, Subscription};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Interval between server-initiated pings
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Drop the connection when no pong arrives within this window
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/ws/downloads/{id}", get(download_ws))
        .route("/ws/queue", get(queue_ws))
        .route("/ws/stats", get(stats_ws))
        .route("/ws/general", get(general_ws))
        .route("/ws/dashboard", get(dashboard_ws))
        .route("/ws/connections", get(connections))
}

// ── Upgrade handlers ─────────────────────────────────────────────────

async fn download_ws(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, Channel::Download(id)))
}

async fn queue_ws(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, Channel::Queue))
}

async fn stats_ws(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, Channel::Stats))
}

async fn general_ws(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, Channel::General))
}

async fn dashboard_ws(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, Channel::Dashboard))
}

async fn connections(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.hub.connection_counts())
}

// ── Socket loop ──────────────────────────────────────────────────────

fn connection_established(channel: Channel) -> String {
    let download_id = match channel {
        Channel::Download(id) => Some(id),
        _ => None,
    };
    json!({
        "type": "connection_established",
        "channel": channel.to_string(),
        "download_id": download_id,
        "timestamp": Utc::now(),
    })
    .to_string()
}

/// Answer for an application-level `{"type":"ping"}` message
pub fn pong_reply(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("type")?.as_str()? != "ping" {
        return None;
    }
    let timestamp = value.get("timestamp").cloned().unwrap_or(Value::Null);
    Some(json!({ "type": "pong", "timestamp": timestamp }).to_string())
}

async fn handle_socket(socket: WebSocket, state: SharedState, channel: Channel) {
    let _guard = state.hub.connect(channel);
    let subscription = state.hub.subscribe(Filter::Channel(channel));
    let (mut sender, receiver) = socket.split();

    if sender
        .send(Message::Text(connection_established(channel).into()))
        .await
        .is_err()
    {
        return;
    }
    debug!("WebSocket connected on {}", channel);
    run_socket_loop(sender, receiver, subscription).await;
    debug!("WebSocket on {} closed", channel);
}

/// Forward hub notifications, answer pings and enforce the pong timeout
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut subscription: Subscription,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    debug!("WebSocket pong timeout");
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            notification = subscription.recv() => {
                let Some(notification) = notification else { break };
                if sender.send(Message::Text(notification.to_json().into())).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = pong_reply(text.as_str()) {
                            if sender.send(Message::Text(reply.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pong_reply_echoes_timestamp() {
        let reply = pong_reply(r#"{"type":"ping","timestamp":1700000000}"#).unwrap();
        let value: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(value["type"], "pong");
        assert_eq!(value["timestamp"], 1700000000);
    }

    #[test]
    fn test_pong_reply_ignores_other_messages() {
        assert!(pong_reply(r#"{"type":"subscribe"}"#).is_none());
        assert!(pong_reply("not json").is_none());
    }

    #[test]
    fn test_connection_established_payload() {
        let id = Uuid::new_v4();
        let value: Value = serde_json::from_str(&connection_established(Channel::Download(id))).unwrap();
        assert_eq!(value["type"], "connection_established");
        assert_eq!(value["download_id"], id.to_string());

        let value: Value = serde_json::from_str(&connection_established(Channel::Queue)).unwrap();
        assert_eq!(value["channel"], "queue");
        assert!(value["download_id"].is_null());
    }
}
