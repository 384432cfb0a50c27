// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dashboard WebSocket: pushes call lifecycle events and periodic stats to
//! connected operator UIs.
//!
//! Server -> client: `{"type": ..., "data": ..., "timestamp": ...}` for
//! `call_started`, `call_ended`, `call_state_changed`, `stats_updated`.
//! Client -> server: `{"type":"ping"}` heartbeat, `{"type":"get_stats"}`.

use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::debug;

use telfio_core::events::{EventKind, LifecycleEvent};

use crate::state::AppState;

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Ping,
    GetStats,
}

pub async fn dashboard_ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|socket| handle_dashboard(socket, state))
}

fn envelope(kind: &str, data: serde_json::Value) -> String {
    serde_json::json!({
        "type": kind,
        "data": data,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
    .to_string()
}

fn stats_message(state: &AppState) -> String {
    let histogram: serde_json::Map<String, serde_json::Value> = state
        .registry
        .state_histogram()
        .into_iter()
        .map(|(call_state, count)| (call_state.to_string(), count.into()))
        .collect();
    envelope(
        "stats_updated",
        serde_json::json!({
            "active_calls": state.registry.active_count(),
            "by_state": histogram,
            "uptime_seconds": state.started_at.elapsed().as_secs(),
        }),
    )
}

fn dashboard_kind(kind: EventKind) -> Option<&'static str> {
    match kind {
        EventKind::CallStarted => Some("call_started"),
        EventKind::CallEnded => Some("call_ended"),
        EventKind::CallStateChanged => Some("call_state_changed"),
        // Campaign completion reaches dashboards via stats updates.
        _ => None,
    }
}

async fn handle_dashboard(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.bus.subscribe();
    let mut stats_tick = tokio::time::interval(STATS_INTERVAL);

    debug!("dashboard client connected");
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(LifecycleEvent { kind, data, .. }) => {
                    if let Some(dashboard_type) = dashboard_kind(kind)
                        && sender
                            .send(Message::Text(envelope(dashboard_type, data).into()))
                            .await
                            .is_err()
                    {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = stats_tick.tick() => {
                if sender
                    .send(Message::Text(stats_message(&state).into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            message = receiver.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(ClientMessage::Ping) => {
                            if sender
                                .send(Message::Text(r#"{"type":"pong"}"#.into()))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        Ok(ClientMessage::GetStats) => {
                            if sender
                                .send(Message::Text(stats_message(&state).into()))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        Err(_) => debug!("unrecognized dashboard message"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            }
        }
    }
    debug!("dashboard client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_deserialize() {
        assert!(matches!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"ping"}"#).unwrap(),
            ClientMessage::Ping
        ));
        assert!(matches!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"get_stats"}"#).unwrap(),
            ClientMessage::GetStats
        ));
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"bogus"}"#).is_err());
    }

    #[test]
    fn lifecycle_kinds_map_to_dashboard_types() {
        assert_eq!(dashboard_kind(EventKind::CallStarted), Some("call_started"));
        assert_eq!(dashboard_kind(EventKind::CallEnded), Some("call_ended"));
        assert_eq!(
            dashboard_kind(EventKind::CallStateChanged),
            Some("call_state_changed")
        );
        assert_eq!(dashboard_kind(EventKind::CallFailed), None);
    }

    #[test]
    fn envelope_has_type_data_timestamp() {
        let message = envelope("call_started", serde_json::json!({"call_id": "c1"}));
        let parsed: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(parsed["type"], "call_started");
        assert_eq!(parsed["data"]["call_id"], "c1");
        assert!(parsed["timestamp"].is_string());
    }
}
