// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Full-stack smoke test: SQLite storage, gateway, session engine, and
//! signed webhook delivery, with scripted providers standing in for the
//! cloud services and a recording mock for the switch.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use telfio_config::{RuntimeSettings, TelfioConfig};
use telfio_core::traits::{NewWebhookConfig, SttEvent};
use telfio_core::{CallStore, FRAME_BYTES};
use telfio_dialer::{CampaignRunner, Dialer, SessionFactory};
use telfio_gateway::{AppState, serve_on};
use telfio_session::{GreetingCache, SessionRegistry, SessionTimings};
use telfio_storage::SqliteStore;
use telfio_test_utils::{MockLlm, MockStt, MockSwitch, MockTts};
use telfio_webhook::{RetryPolicy, WebhookDispatcher, verify_signature};

struct Stack {
    base_url: String,
    ws_base: String,
    store: Arc<SqliteStore>,
    stt: Arc<MockStt>,
    registry: Arc<SessionRegistry>,
    dialer: Arc<Dialer>,
    cancel: CancellationToken,
    _dir: tempfile::TempDir,
}

async fn spawn_stack() -> Stack {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("e2e.db");
    let store = Arc::new(SqliteStore::open(db_path.to_str().unwrap()).await.unwrap());

    let stt = MockStt::new();
    let llm = MockLlm::with_responses(vec!["Tudo ótimo por aqui, obrigado!"]);
    let tts = MockTts::new();
    let switch = MockSwitch::new();
    let registry = SessionRegistry::new();
    let (bus, _) = broadcast::channel(256);
    let settings = RuntimeSettings::new(TelfioConfig::default());

    let factory = SessionFactory {
        stt: stt.clone(),
        llm,
        tts,
        store: store.clone(),
        bus: bus.clone(),
        greetings: Arc::new(GreetingCache::new()),
        timings: SessionTimings {
            connect_timeout: Duration::from_secs(2),
            ..SessionTimings::default()
        },
        settings: settings.clone(),
    };
    let dialer = Dialer::new(switch, registry.clone(), store.clone(), factory);
    let campaigns = CampaignRunner::new(store.clone(), dialer.clone(), bus.clone());
    let webhooks = WebhookDispatcher::with_policy(
        store.clone(),
        RetryPolicy {
            max_attempts: 3,
            delays: vec![Duration::from_millis(20), Duration::from_millis(40)],
        },
    );

    let cancel = CancellationToken::new();
    webhooks.spawn(bus.subscribe(), cancel.clone());

    let state = AppState {
        store: store.clone(),
        registry: registry.clone(),
        dialer: dialer.clone(),
        campaigns,
        webhooks,
        settings,
        bus,
        bind_grace: Duration::from_millis(500),
        unknown_frames: Arc::new(AtomicU64::new(0)),
        started_at: std::time::Instant::now(),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serve_cancel = cancel.clone();
    tokio::spawn(async move {
        serve_on(listener, state, serve_cancel).await.unwrap();
    });

    Stack {
        base_url: format!("http://{addr}"),
        ws_base: format!("ws://{addr}"),
        store,
        stt,
        registry,
        dialer,
        cancel,
        _dir: dir,
    }
}

#[tokio::test]
async fn outbound_call_round_trip_with_signed_webhooks() {
    let stack = spawn_stack().await;
    let client = reqwest::Client::new();

    // A webhook endpoint subscribed to start/end, with a secret.
    let sink = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&sink)
        .await;
    stack
        .store
        .create_webhook(&NewWebhookConfig {
            url: sink.uri(),
            events: vec!["call.started".to_string(), "call.ended".to_string()],
            secret: Some("s3cret".to_string()),
            is_active: true,
        })
        .await
        .unwrap();

    // Operator dials out.
    let response = client
        .post(format!("{}/calls/dial", stack.base_url))
        .json(&serde_json::json!({ "number": "11999990000" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let call_id = response.json::<serde_json::Value>().await.unwrap()["call_id"]
        .as_str()
        .unwrap()
        .to_string();

    // The switch answers: media WebSocket connects and binds.
    let (mut ws, _) = connect_async(format!("{}/ws/{call_id}", stack.ws_base))
        .await
        .unwrap();
    ws.send(Message::Text(
        format!(r#"{{"type":"metadata","uuid":"{call_id}","called":"5511999990000"}}"#).into(),
    ))
    .await
    .unwrap();
    ws.send(Message::Binary(vec![0u8; FRAME_BYTES].into()))
        .await
        .unwrap();

    // Caller speaks; the scripted STT transcribes.
    stack.stt.wait_for_open(1).await;
    let script = stack.stt.script(0).await;
    script
        .send(SttEvent::Final { text: "oi tudo bem".into(), duration_ms: 2000 })
        .await
        .unwrap();
    script.send(SttEvent::UtteranceEnd).await.unwrap();

    // Assistant audio comes back over the socket.
    let got_audio = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(Ok(message)) = ws.next().await {
            if message.is_binary() {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(got_audio, "assistant audio never reached the switch");

    // Wait for the reply to finish and be committed, then hang up.
    for _ in 0..200 {
        let messages = stack.store.get_messages(&call_id).await.unwrap();
        if messages.len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    ws.send(Message::Text(r#"{"type":"hangup"}"#.into())).await.unwrap();

    for _ in 0..200 {
        if stack.registry.active_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(stack.registry.active_count(), 0);

    // Persisted outcome: completed, with an alternating transcript.
    let call = stack.store.get_call(&call_id).await.unwrap().unwrap();
    assert_eq!(call.status, "completed");
    assert!(call.duration_seconds.unwrap_or(0.0) >= 0.0);
    let messages = stack.store.get_messages(&call_id).await.unwrap();
    assert_eq!(messages[0].role, "user");
    assert_eq!(messages[0].content, "oi tudo bem");
    assert_eq!(messages[1].role, "assistant");

    // Webhooks: started then ended, each correctly signed.
    for _ in 0..200 {
        if sink.received_requests().await.unwrap_or_default().len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    let requests = sink.received_requests().await.unwrap();
    assert!(requests.len() >= 2, "expected started+ended webhooks");

    let kinds: Vec<String> = requests
        .iter()
        .map(|r| {
            r.headers
                .get("x-webhook-event")
                .unwrap()
                .to_str()
                .unwrap()
                .to_string()
        })
        .collect();
    assert_eq!(kinds[0], "call.started");
    assert_eq!(kinds.last().map(String::as_str), Some("call.ended"));

    for request in &requests {
        let body = String::from_utf8(request.body.clone()).unwrap();
        let signature = request
            .headers
            .get("x-webhook-signature")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(verify_signature("s3cret", &body, signature));
    }

    // The ended payload carries the committed transcript.
    let ended_body: serde_json::Value =
        serde_json::from_slice(&requests.last().unwrap().body).unwrap();
    assert_eq!(ended_body["event"], "call.ended");
    let transcript = ended_body["data"]["transcript"].as_array().unwrap();
    assert!(transcript.len() >= 2);

    stack.cancel.cancel();
}

#[tokio::test]
async fn dial_rejects_duplicate_of_live_call_id() {
    let stack = spawn_stack().await;

    // Duplicate admission is exercised at the registry level through two
    // dial attempts racing for the same id space is impossible (ids are
    // generated), so assert the registry-level contract directly.
    let call_id = stack.dialer.dial("11999990000", None, None).await.unwrap();
    let handle = stack.registry.get(&call_id).unwrap();

    let err = stack
        .registry
        .admit(
            handle.clone(),
            telfio_session::AdmissionLimits {
                max_concurrent_calls: 10,
                campaign_max_concurrent: None,
            },
        )
        .await;
    assert!(matches!(err, Err(telfio_core::TelfioError::Conflict(_))));
    // The original session is unaffected.
    assert!(stack.registry.get(&call_id).is_some());

    stack.cancel.cancel();
}
