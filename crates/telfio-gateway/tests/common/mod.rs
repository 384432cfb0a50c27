// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared gateway test harness: a full AppState over mocks, served on an
//! ephemeral port.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use telfio_config::{RuntimeSettings, TelfioConfig};
use telfio_core::events::LifecycleEvent;
use telfio_dialer::{CampaignRunner, Dialer, SessionFactory};
use telfio_gateway::{AppState, serve_on};
use telfio_session::{GreetingCache, SessionRegistry, SessionTimings};
use telfio_test_utils::{MemoryStore, MockLlm, MockStt, MockSwitch, MockTts};
use telfio_webhook::WebhookDispatcher;

#[allow(dead_code)] // each test file uses a different subset
pub struct Gateway {
    pub base_url: String,
    pub ws_base: String,
    pub store: Arc<MemoryStore>,
    pub switch: Arc<MockSwitch>,
    pub registry: Arc<SessionRegistry>,
    pub dialer: Arc<Dialer>,
    pub bus: broadcast::Sender<LifecycleEvent>,
    pub cancel: CancellationToken,
}

pub async fn spawn_gateway(bind_grace: Duration) -> Gateway {
    let store = MemoryStore::new();
    let switch = MockSwitch::new();
    let registry = SessionRegistry::new();
    let (bus, _) = broadcast::channel(256);
    let settings = RuntimeSettings::new(TelfioConfig::default());

    let factory = SessionFactory {
        stt: MockStt::new(),
        llm: MockLlm::with_responses(vec![]),
        tts: MockTts::new(),
        store: store.clone(),
        bus: bus.clone(),
        greetings: Arc::new(GreetingCache::new()),
        timings: SessionTimings {
            connect_timeout: Duration::from_secs(2),
            ..SessionTimings::default()
        },
        settings: settings.clone(),
    };
    let dialer = Dialer::new(switch.clone(), registry.clone(), store.clone(), factory);
    let campaigns = CampaignRunner::new(store.clone(), dialer.clone(), bus.clone());
    let webhooks = WebhookDispatcher::new(store.clone());

    let state = AppState {
        store: store.clone(),
        registry: registry.clone(),
        dialer: dialer.clone(),
        campaigns,
        webhooks,
        settings,
        bus: bus.clone(),
        bind_grace,
        unknown_frames: Arc::new(AtomicU64::new(0)),
        started_at: std::time::Instant::now(),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let serve_cancel = cancel.clone();
    tokio::spawn(async move {
        serve_on(listener, state, serve_cancel).await.unwrap();
    });

    Gateway {
        base_url: format!("http://{addr}"),
        ws_base: format!("ws://{addr}"),
        store,
        switch,
        registry,
        dialer,
        bus,
        cancel,
    }
}
