// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Switch media WebSocket tests: orphan rejection, inbound admission,
//! outbound binding.

mod common;

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use common::spawn_gateway;
use telfio_core::{CallStore, FRAME_BYTES};

#[tokio::test]
async fn orphan_connection_closes_with_policy_violation() {
    let gateway = spawn_gateway(Duration::from_millis(300)).await;

    let (mut ws, _) = connect_async(format!("{}/ws/unknown-id", gateway.ws_base))
        .await
        .expect("connect should succeed");

    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Close(frame) = message {
                return frame;
            }
        }
        None
    })
    .await
    .expect("orphan connection must close within the grace window");

    let frame = closed.expect("close frame expected");
    assert_eq!(frame.code, CloseCode::Policy);
    assert_eq!(gateway.registry.active_count(), 0);

    gateway.cancel.cancel();
}

#[tokio::test]
async fn inbound_metadata_admits_session() {
    let gateway = spawn_gateway(Duration::from_secs(5)).await;

    let (mut ws, _) = connect_async(format!("{}/ws/call-in-1", gateway.ws_base))
        .await
        .unwrap();

    // The switch always announces itself with a metadata frame.
    ws.send(Message::Text(
        r#"{"type":"metadata","uuid":"fs-123","caller":"5511988880000","called":"5511900000000"}"#
            .into(),
    ))
    .await
    .unwrap();

    // Session appears in the registry.
    for _ in 0..100 {
        if gateway.registry.active_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(gateway.registry.active_count(), 1);

    // Audio flows without complaint.
    ws.send(Message::Binary(vec![0u8; FRAME_BYTES].into()))
        .await
        .unwrap();

    // The call row was created for the inbound leg.
    for _ in 0..100 {
        if gateway.store.get_call("call-in-1").await.unwrap().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let call = gateway.store.get_call("call-in-1").await.unwrap().unwrap();
    assert_eq!(call.direction, "inbound");

    // Switch-side hangup tears the session down.
    ws.send(Message::Text(r#"{"type":"hangup"}"#.into())).await.unwrap();
    for _ in 0..200 {
        if gateway.registry.active_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(gateway.registry.active_count(), 0);

    let call = gateway.store.get_call("call-in-1").await.unwrap().unwrap();
    assert!(call.status == "completed" || call.status == "failed");

    gateway.cancel.cancel();
}

#[tokio::test]
async fn outbound_connection_binds_to_pending_session() {
    let gateway = spawn_gateway(Duration::from_secs(5)).await;

    let call_id = gateway.dialer.dial("11999990000", None, None).await.unwrap();
    assert_eq!(gateway.registry.active_count(), 1);

    let (mut ws, _) = connect_async(format!("{}/ws/{call_id}", gateway.ws_base))
        .await
        .unwrap();
    ws.send(Message::Text(
        format!(r#"{{"type":"metadata","uuid":"{call_id}"}}"#).into(),
    ))
    .await
    .unwrap();

    // The pending session goes active (no greeting configured: listening).
    let handle = gateway.registry.get(&call_id).unwrap();
    let mut state = handle.state.clone();
    let reached = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if state.borrow_and_update().is_active() {
                return;
            }
            if state.changed().await.is_err() {
                return;
            }
        }
    })
    .await;
    assert!(reached.is_ok(), "session never left pending");

    // Dropping the socket counts as a switch disconnect.
    drop(ws);
    for _ in 0..200 {
        if gateway.registry.active_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(gateway.registry.active_count(), 0);

    gateway.cancel.cancel();
}
