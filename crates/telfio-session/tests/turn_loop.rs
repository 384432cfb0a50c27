// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests of the call FSM against scripted providers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use telfio_core::events::EventKind;
use telfio_core::traits::{CallStore, SttEvent};
use telfio_core::types::{
    CallOutcome, CallState, Direction, PromptSnapshot, SwitchControlMsg, TerminalStatus,
};
use telfio_session::session::{APOLOGY_PHRASE, FAREWELL_PHRASE};
use telfio_session::{
    CallSession, GreetingCache, SessionCommand, SessionContext, SessionTimings, switch_link,
};
use telfio_test_utils::{EventCollector, MemoryStore, MockLlm, MockStt, MockTts};

struct TestCall {
    cmd_tx: mpsc::Sender<SessionCommand>,
    state_rx: watch::Receiver<CallState>,
    stt: Arc<MockStt>,
    llm: Arc<MockLlm>,
    store: Arc<MemoryStore>,
    events: EventCollector,
    frames_delivered: Arc<AtomicUsize>,
    join: JoinHandle<CallOutcome>,
    // Kept alive so the switch's audio channel doesn't close and trigger a
    // spurious disconnect while the session is under test.
    switch_audio_tx: Option<mpsc::Sender<bytes::Bytes>>,
}

fn prompt(greeting: Option<&str>) -> PromptSnapshot {
    PromptSnapshot {
        prompt_id: None,
        system_prompt: "Você é um atendente. Seja breve.".to_string(),
        voice_id: "pt-BR-isadora".to_string(),
        llm_model: "gpt-4.1-nano".to_string(),
        temperature: 0.7,
        greeting_text: greeting.map(str::to_string),
        greeting_duration_ms: None,
    }
}

fn spawn_call(
    prompt: PromptSnapshot,
    timings: SessionTimings,
    llm: Arc<MockLlm>,
    tts: Arc<MockTts>,
) -> TestCall {
    let stt = MockStt::new();
    let store = MemoryStore::new();
    let (bus, _) = broadcast::channel(256);
    let events = EventCollector::subscribe(&bus);

    let ctx = SessionContext {
        stt: stt.clone(),
        llm: llm.clone(),
        tts,
        store: store.clone(),
        bus,
        greetings: Arc::new(GreetingCache::new()),
        language: "pt-BR".to_string(),
    };

    let (session, cmd_tx, state_rx) =
        CallSession::new("call-1".to_string(), Direction::Inbound, prompt, ctx, timings);
    let join = tokio::spawn(session.run());

    TestCall {
        cmd_tx,
        state_rx,
        stt,
        llm,
        store,
        events,
        frames_delivered: Arc::new(AtomicUsize::new(0)),
        join,
        switch_audio_tx: None,
    }
}

impl TestCall {
    /// Attaches a switch link and spawns a drain for outbound frames.
    async fn attach(&mut self) -> mpsc::Sender<SwitchControlMsg> {
        let (link, mut ports) = switch_link(Some("fs-uuid-1".into()), Some("100".into()), None);
        self.cmd_tx
            .send(SessionCommand::AttachSwitch(Box::new(link)))
            .await
            .expect("session gone before attach");
        self.switch_audio_tx = Some(ports.audio_tx.clone());

        let counter = self.frames_delivered.clone();
        tokio::spawn(async move {
            while ports.frames_rx.recv().await.is_some() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        ports.control_tx
    }

    async fn wait_for_state(&mut self, want: CallState) {
        let result = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if *self.state_rx.borrow_and_update() == want {
                    return;
                }
                if self.state_rx.changed().await.is_err() {
                    panic!("state channel closed while waiting for {want}");
                }
            }
        })
        .await;
        assert!(result.is_ok(), "timed out waiting for state {want}");
    }

    async fn wait_for_messages(&self, count: usize) {
        let result = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let messages = self.store.get_messages("call-1").await.unwrap();
                if messages.len() >= count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(result.is_ok(), "timed out waiting for {count} messages");
    }
}

#[tokio::test]
async fn inbound_happy_path_commits_alternating_transcript() {
    let llm = MockLlm::with_responses(vec!["Que bom falar com você!"]);
    let tts = MockTts::new();
    let mut call = spawn_call(
        prompt(Some("Olá, em que posso ajudar?")),
        SessionTimings::default(),
        llm,
        tts,
    );

    let control = call.attach().await;

    // Greeting plays, then the session listens.
    call.wait_for_state(CallState::Listening).await;
    call.wait_for_messages(1).await;

    // User speaks.
    call.stt.wait_for_open(1).await;
    let script = call.stt.script(0).await;
    script.send(SttEvent::Interim { text: "oi".into() }).await.unwrap();
    script
        .send(SttEvent::Final { text: "oi tudo bem".into(), duration_ms: 2000 })
        .await
        .unwrap();
    script.send(SttEvent::UtteranceEnd).await.unwrap();

    // Assistant reply is synthesized and committed.
    call.wait_for_messages(3).await;

    // Switch hangs up.
    control.send(SwitchControlMsg::Hangup).await.unwrap();
    let outcome = call.join.await.unwrap();

    assert_eq!(outcome.status, TerminalStatus::Completed);
    assert!(outcome.reached_listening);
    assert!(outcome.error.is_none());

    let messages = call.store.get_messages("call-1").await.unwrap();
    let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
    assert_eq!(roles, vec!["assistant", "user", "assistant"]);
    assert_eq!(messages[0].content, "Olá, em que posso ajudar?");
    assert_eq!(messages[1].content, "oi tudo bem");
    assert!(!messages[2].content.is_empty());

    // Greeting audio reached the switch.
    assert!(call.frames_delivered.load(Ordering::SeqCst) > 0);

    // Lifecycle events arrive in order with at least three transitions.
    let events = call.events.drain();
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds.first(), Some(&EventKind::CallStarted));
    assert_eq!(kinds.last(), Some(&EventKind::CallEnded));
    let transitions = kinds
        .iter()
        .filter(|k| **k == EventKind::CallStateChanged)
        .count();
    assert!(transitions >= 3, "expected >=3 transitions, got {transitions}");
}

#[tokio::test]
async fn barge_in_cancels_streams_and_truncates() {
    let full_reply = "Essa é uma resposta bastante longa que segue falando sem parar por muito tempo.";
    // Slow enough that the reply is still streaming when the user barges in.
    let llm = MockLlm::paced_with_responses(Duration::from_millis(100), vec![full_reply]);
    let tts = MockTts::paced(Duration::from_millis(20));
    let mut call = spawn_call(prompt(None), SessionTimings::default(), llm, tts);

    call.attach().await;
    call.wait_for_state(CallState::Listening).await;

    call.stt.wait_for_open(1).await;
    let script = call.stt.script(0).await;
    script
        .send(SttEvent::Final { text: "olá".into(), duration_ms: 500 })
        .await
        .unwrap();
    script.send(SttEvent::UtteranceEnd).await.unwrap();

    call.wait_for_state(CallState::Speaking).await;
    // Let a few frames play so the truncation estimate is non-zero.
    tokio::time::sleep(Duration::from_millis(300)).await;

    // User barges in: interim longer than the threshold.
    script
        .send(SttEvent::Interim { text: "pode parar".into() })
        .await
        .unwrap();
    call.wait_for_state(CallState::Listening).await;

    assert_eq!(call.llm.cancelled_count(), 1, "LLM must be cancelled on barge-in");

    // New utterance drives a second turn.
    script
        .send(SttEvent::Final { text: "pode parar".into(), duration_ms: 700 })
        .await
        .unwrap();
    script.send(SttEvent::UtteranceEnd).await.unwrap();
    call.wait_for_messages(4).await;
    assert_eq!(call.llm.stream_count(), 2);

    call.cmd_tx.send(SessionCommand::Hangup).await.unwrap();
    let outcome = call.join.await.unwrap();
    assert_eq!(outcome.status, TerminalStatus::Completed);

    let messages = call.store.get_messages("call-1").await.unwrap();
    // user, truncated assistant, user, assistant.
    assert_eq!(messages[0].role, "user");
    assert_eq!(messages[1].role, "assistant");
    let truncated = &messages[1].content;
    assert!(truncated.len() < full_reply.len(), "assistant entry must be truncated");
    assert!(
        full_reply.starts_with(truncated.as_str()),
        "truncated text must be a prefix of what the model said"
    );
    assert!(messages[1].audio_duration_ms.unwrap_or(0) > 0);
}

#[tokio::test]
async fn connect_timeout_fails_pending_session() {
    let llm = MockLlm::with_responses(vec![]);
    let tts = MockTts::new();
    let mut timings = SessionTimings::default();
    timings.connect_timeout = Duration::from_millis(100);

    let call = spawn_call(prompt(None), timings, llm, tts);
    let outcome = call.join.await.unwrap();

    assert_eq!(outcome.status, TerminalStatus::Failed);
    assert!(outcome.connect_failure);
    assert!(!outcome.reached_listening);
}

#[tokio::test]
async fn inactivity_says_goodbye_then_hangs_up() {
    let llm = MockLlm::with_responses(vec![]);
    let tts = MockTts::new();
    let mut timings = SessionTimings::default();
    timings.inactivity_timeout = Duration::from_millis(400);

    let mut call = spawn_call(prompt(None), timings, llm, tts);
    call.attach().await;
    call.wait_for_state(CallState::Listening).await;

    // No audio in either direction: the session must not end silently.
    let outcome = tokio::time::timeout(Duration::from_secs(5), call.join)
        .await
        .expect("session should end after inactivity")
        .unwrap();

    let messages = call.store.get_messages("call-1").await.unwrap();
    assert_eq!(messages.last().map(|m| m.content.as_str()), Some(FAREWELL_PHRASE));
    assert!(outcome.reached_listening);
    // No user turn happened.
    assert_eq!(outcome.status, TerminalStatus::Failed);
    assert!(outcome.error.is_none());
}

#[tokio::test]
async fn slow_llm_first_token_triggers_apology_and_keeps_session() {
    let llm = MockLlm::paced_with_responses(Duration::from_secs(30), vec!["nunca chega"]);
    let tts = MockTts::new();
    let mut timings = SessionTimings::default();
    timings.llm_first_token_timeout = Duration::from_millis(300);

    let mut call = spawn_call(prompt(None), timings, llm, tts);
    call.attach().await;
    call.wait_for_state(CallState::Listening).await;

    call.stt.wait_for_open(1).await;
    let script = call.stt.script(0).await;
    script
        .send(SttEvent::Final { text: "alô".into(), duration_ms: 400 })
        .await
        .unwrap();
    script.send(SttEvent::UtteranceEnd).await.unwrap();

    // user entry + apology entry.
    call.wait_for_messages(2).await;
    assert_eq!(call.llm.cancelled_count(), 1);

    let messages = call.store.get_messages("call-1").await.unwrap();
    assert_eq!(messages[1].content, APOLOGY_PHRASE);

    // The session is still alive and listening.
    call.wait_for_state(CallState::Listening).await;
    call.cmd_tx.send(SessionCommand::Hangup).await.unwrap();
    let _ = call.join.await.unwrap();
}
