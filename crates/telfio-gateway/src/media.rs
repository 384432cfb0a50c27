// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Switch media adapter: the WebSocket endpoint the switch exchanges
//! framed PCM with, one connection per call.
//!
//! Binding: a connection whose path `call_id` matches a pending session
//! attaches to it (outbound). Otherwise the first JSON `metadata` control
//! frame admits an inbound session under the caps. A connection that does
//! neither within the grace window closes with 1008 (policy violation).
//!
//! Outbound audio is paced at wall-clock 20 ms from a bounded 200 ms
//! queue; a full queue backpressures the session's TTS feed.

use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use telfio_core::FRAME_MS;
use telfio_core::traits::NewCall;
use telfio_core::types::{Direction, SwitchControlMsg};
use telfio_session::registry::AdmissionLimits;
use telfio_session::{SessionCommand, SessionHandle, SwitchPorts, switch_link};

use crate::state::AppState;

/// WebSocket close code for policy violations (RFC 6455).
const POLICY_VIOLATION: u16 = 1008;

pub async fn media_ws_handler(
    Path(call_id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_media(socket, call_id, state))
}

async fn handle_media(socket: WebSocket, call_id: String, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let bound = bind_connection(&mut sender, &mut receiver, &call_id, &state).await;
    let Some(ports) = bound else {
        let close = CloseFrame {
            code: POLICY_VIOLATION,
            reason: "no session for connection".into(),
        };
        let _ = sender.send(Message::Close(Some(close))).await;
        info!(call_id, "orphan media connection closed");
        return;
    };

    let SwitchPorts {
        audio_tx,
        control_tx,
        mut frames_rx,
    } = ports;

    // Outbound pacer: one frame per 20 ms wall clock.
    let send_task = tokio::spawn(async move {
        let mut pace = tokio::time::interval(Duration::from_millis(FRAME_MS));
        pace.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        while let Some(frame) = frames_rx.recv().await {
            pace.tick().await;
            if sender.send(Message::Binary(frame)).await.is_err() {
                break;
            }
        }
        // Session ended or socket died; say goodbye either way.
        let _ = sender.send(Message::Close(None)).await;
    });

    // Inbound relay: binary PCM to the session's audio stream, JSON text
    // to its control stream.
    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Binary(pcm) => {
                if audio_tx.send(pcm).await.is_err() {
                    break;
                }
            }
            Message::Text(text) => match serde_json::from_str::<SwitchControlMsg>(text.as_str()) {
                Ok(msg) => {
                    let is_hangup = matches!(msg, SwitchControlMsg::Hangup);
                    if control_tx.send(msg).await.is_err() {
                        break;
                    }
                    if is_hangup {
                        break;
                    }
                }
                Err(_) => {
                    state.unknown_frames.fetch_add(1, Ordering::Relaxed);
                    debug!(call_id, "unrecognized control frame ignored");
                }
            },
            Message::Close(_) => break,
            // Ping/pong handled by the protocol layer.
            _ => {}
        }
    }

    // Dropping the senders tells the session the switch is gone.
    drop(audio_tx);
    drop(control_tx);
    send_task.abort();
    info!(call_id, "media connection closed");
}

/// Resolves the connection to a session within the grace window.
async fn bind_connection(
    _sender: &mut SplitSink<WebSocket, Message>,
    receiver: &mut SplitStream<WebSocket>,
    call_id: &str,
    state: &AppState,
) -> Option<SwitchPorts> {
    let deadline = tokio::time::Instant::now() + state.bind_grace;

    // Outbound: a pending session is already registered under this id.
    if let Some(handle) = state.registry.get(call_id) {
        return attach(handle, None, None, None).await;
    }

    // Inbound: the switch's first message is a metadata frame.
    loop {
        let message = tokio::select! {
            message = receiver.next() => message,
            _ = tokio::time::sleep_until(deadline) => return None,
        };
        match message {
            Some(Ok(Message::Text(text))) => {
                if let Ok(SwitchControlMsg::Metadata { uuid, caller, called }) =
                    serde_json::from_str(text.as_str())
                {
                    return admit_inbound(call_id, state, uuid, caller, called).await;
                }
                state.unknown_frames.fetch_add(1, Ordering::Relaxed);
            }
            Some(Ok(Message::Close(_))) | None => return None,
            Some(Ok(_)) => {
                // Audio before any binding; a pending session may still
                // appear (origination race).
                if let Some(handle) = state.registry.get(call_id) {
                    return attach(handle, None, None, None).await;
                }
            }
            Some(Err(e)) => {
                warn!(call_id, error = %e, "media socket error during bind");
                return None;
            }
        }
    }
}

async fn attach(
    handle: SessionHandle,
    switch_uuid: Option<String>,
    caller: Option<String>,
    called: Option<String>,
) -> Option<SwitchPorts> {
    let (link, ports) = switch_link(switch_uuid, caller, called);
    match handle
        .commands
        .send(SessionCommand::AttachSwitch(Box::new(link)))
        .await
    {
        Ok(()) => Some(ports),
        Err(_) => None,
    }
}

/// Admits a new inbound session under the active prompt and the caps.
async fn admit_inbound(
    call_id: &str,
    state: &AppState,
    switch_uuid: Option<String>,
    caller: Option<String>,
    called: Option<String>,
) -> Option<SwitchPorts> {
    let factory = state.dialer.factory();
    let prompt_row = match state.store.active_prompt().await {
        Ok(row) => row,
        Err(e) => {
            warn!(call_id, error = %e, "active prompt lookup failed");
            None
        }
    };
    let snapshot = factory.snapshot(prompt_row.as_ref());

    let (session, handle) = factory.create(
        call_id,
        Direction::Inbound,
        snapshot.clone(),
        None,
        called.clone(),
    );

    let limits = AdmissionLimits {
        max_concurrent_calls: state.settings.current().max_concurrent_calls,
        campaign_max_concurrent: None,
    };
    if let Err(e) = state.registry.admit(handle, limits).await {
        warn!(call_id, error = %e, "inbound admission denied");
        return None;
    }

    if let Err(e) = state
        .store
        .insert_call(&NewCall {
            call_id: call_id.to_string(),
            switch_uuid: switch_uuid.clone(),
            caller_number: caller.clone(),
            called_number: called.clone(),
            prompt_id: snapshot.prompt_id,
            direction: Direction::Inbound.to_string(),
            start_time: chrono::Utc::now().to_rfc3339(),
        })
        .await
    {
        warn!(call_id, error = %e, "inbound call insert failed");
    }

    let registry = state.registry.clone();
    let spawned_call_id = call_id.to_string();
    tokio::spawn(async move {
        let outcome = session.run().await;
        registry.remove(&spawned_call_id);
        info!(call_id = %spawned_call_id, status = %outcome.status, "inbound session finished");
    });

    let handle = state.registry.get(call_id)?;
    info!(call_id, "inbound call admitted");
    attach(handle, switch_uuid, caller, called).await
}
