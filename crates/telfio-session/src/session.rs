// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-call state machine and turn loop.
//!
//! One selector loop over typed event channels (switch audio, switch
//! control, STT, LLM, TTS, operator commands, a timer tick) drives the
//! FSM; nothing else mutates session state, so transitions are totally
//! ordered without locks. Provider I/O stays off this loop behind the
//! adapters' channels.
//!
//! States: PENDING → GREETING/LISTENING → THINKING → SPEAKING → ... →
//! HANGING_UP → ENDED. Barge-in (user speech while the assistant is
//! audible) cancels TTS and LLM, commits the truncated assistant text, and
//! returns to LISTENING.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use telfio_core::events::{EventKind, LifecycleEvent};
use telfio_core::traits::{
    CallStore, ChatMessage, ChatRequest, LanguageModel, LlmEvent, LlmStream, SpeechToText,
    SttEvent, SttSession, TextToSpeech, TtsEvent,
};
use telfio_core::types::{
    CallOutcome, CallState, Direction, PromptSnapshot, Role, SwitchControlMsg, TerminalStatus,
    TranscriptEntry, FRAME_MS,
};

use crate::greeting::{self, GreetingCache};

/// Spoken before hanging up an inactive call.
pub const FAREWELL_PHRASE: &str = "Obrigado pela ligação. Até logo!";
/// Spoken when the model fails or stalls; the call continues.
pub const APOLOGY_PHRASE: &str =
    "Desculpe, estou com dificuldades técnicas no momento. Pode repetir?";
/// Spoken when the model returns an empty reply.
pub const EMPTY_REPLY_PHRASE: &str = "Desculpe, não consegui processar sua solicitação.";

/// Speech-rate heuristic used to truncate a barge-interrupted assistant
/// entry to the text actually delivered.
const ASSISTANT_CHARS_PER_SEC: f64 = 15.0;

/// Transcript entries handed to the LLM (system prompt excluded).
const ROLLING_CONTEXT_ENTRIES: usize = 10;

/// Outbound frame queue toward the switch adapter: 10 × 20 ms = 200 ms.
/// A full queue backpressures TTS to telephony real time.
const SWITCH_QUEUE_FRAMES: usize = 10;

/// A second provider failure within this window escalates to fatal.
const PROVIDER_REFAIL_WINDOW: Duration = Duration::from_secs(5);

/// Session timeout ladder. Defaults match the documented behavior.
#[derive(Debug, Clone)]
pub struct SessionTimings {
    pub connect_timeout: Duration,
    pub inactivity_timeout: Duration,
    pub llm_first_token_timeout: Duration,
    pub tts_first_frame_warn: Duration,
    pub tts_first_frame_timeout: Duration,
    pub drain_timeout: Duration,
    pub barge_in_min_chars: usize,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(45),
            inactivity_timeout: Duration::from_secs(30),
            llm_first_token_timeout: Duration::from_secs(8),
            tts_first_frame_warn: Duration::from_secs(4),
            tts_first_frame_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(2),
            barge_in_min_chars: 3,
        }
    }
}

/// Provider and infrastructure dependencies of one session.
#[derive(Clone)]
pub struct SessionContext {
    pub stt: Arc<dyn SpeechToText>,
    pub llm: Arc<dyn LanguageModel>,
    pub tts: Arc<dyn TextToSpeech>,
    pub store: Arc<dyn CallStore>,
    pub bus: broadcast::Sender<LifecycleEvent>,
    pub greetings: Arc<GreetingCache>,
    pub language: String,
}

/// Commands accepted from the registry/operators.
pub enum SessionCommand {
    /// The switch media connection arrived; take ownership of its channels.
    AttachSwitch(Box<SwitchLink>),
    /// Force teardown.
    Hangup,
}

/// The session's end of a switch media connection.
pub struct SwitchLink {
    pub audio_rx: mpsc::Receiver<Bytes>,
    pub control_rx: mpsc::Receiver<SwitchControlMsg>,
    pub frames_tx: mpsc::Sender<Bytes>,
    pub switch_uuid: Option<String>,
    pub caller_number: Option<String>,
    pub called_number: Option<String>,
}

/// The adapter's end of a switch media connection.
pub struct SwitchPorts {
    pub audio_tx: mpsc::Sender<Bytes>,
    pub control_tx: mpsc::Sender<SwitchControlMsg>,
    pub frames_rx: mpsc::Receiver<Bytes>,
}

/// Builds the channel pair connecting a media WebSocket to a session.
pub fn switch_link(
    switch_uuid: Option<String>,
    caller_number: Option<String>,
    called_number: Option<String>,
) -> (SwitchLink, SwitchPorts) {
    let (audio_tx, audio_rx) = mpsc::channel(64);
    let (control_tx, control_rx) = mpsc::channel(16);
    let (frames_tx, frames_rx) = mpsc::channel(SWITCH_QUEUE_FRAMES);
    (
        SwitchLink {
            audio_rx,
            control_rx,
            frames_tx,
            switch_uuid,
            caller_number,
            called_number,
        },
        SwitchPorts {
            audio_tx,
            control_tx,
            frames_rx,
        },
    )
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

async fn recv_or_pending<T>(rx: Option<&mut mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect::<String>().trim_end().to_string()
}

/// One live call.
pub struct CallSession {
    call_id: String,
    direction: Direction,
    prompt: PromptSnapshot,
    timings: SessionTimings,
    ctx: SessionContext,

    state: CallState,
    state_tx: watch::Sender<CallState>,
    cmd_rx: mpsc::Receiver<SessionCommand>,

    audio_rx: Option<mpsc::Receiver<Bytes>>,
    control_rx: Option<mpsc::Receiver<SwitchControlMsg>>,
    frames_tx: Option<mpsc::Sender<Bytes>>,

    stt: Option<SttSession>,
    llm: Option<LlmStream>,
    tts_events: Option<mpsc::Receiver<TtsEvent>>,
    tts_text: Option<mpsc::Sender<String>>,
    tts_cancel: Option<CancellationToken>,

    transcript: Vec<TranscriptEntry>,
    /// Entries whose persistence failed; re-flushed at teardown.
    unflushed: Vec<TranscriptEntry>,
    pending_user: String,
    pending_user_ms: u64,
    assistant_text: String,
    spoken_frames: u64,
    speaking_greeting: bool,
    greeting_capture: Option<Vec<u8>>,
    hang_after_speak: bool,
    tts_fallback_spoken: bool,
    turns: u32,
    reached_listening: bool,
    connect_failure: bool,
    fatal_error: Option<String>,
    call_started_emitted: bool,

    started: Instant,
    answered: Option<Instant>,
    last_audio: Instant,
    llm_deadline: Option<Instant>,
    tts_warn_deadline: Option<Instant>,
    tts_fallback_deadline: Option<Instant>,
    tts_first_frame_seen: bool,
    last_stt_failure: Option<Instant>,
    last_llm_failure: Option<Instant>,
    last_tts_failure: Option<Instant>,
}

impl CallSession {
    /// Creates a session in `PENDING`. Returns the command sender and the
    /// state watch the registry handle is built from.
    pub fn new(
        call_id: String,
        direction: Direction,
        prompt: PromptSnapshot,
        ctx: SessionContext,
        timings: SessionTimings,
    ) -> (Self, mpsc::Sender<SessionCommand>, watch::Receiver<CallState>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (state_tx, state_rx) = watch::channel(CallState::Pending);
        let now = Instant::now();
        let session = Self {
            call_id,
            direction,
            prompt,
            timings,
            ctx,
            state: CallState::Pending,
            state_tx,
            cmd_rx,
            audio_rx: None,
            control_rx: None,
            frames_tx: None,
            stt: None,
            llm: None,
            tts_events: None,
            tts_text: None,
            tts_cancel: None,
            transcript: Vec::new(),
            unflushed: Vec::new(),
            pending_user: String::new(),
            pending_user_ms: 0,
            assistant_text: String::new(),
            spoken_frames: 0,
            speaking_greeting: false,
            greeting_capture: None,
            hang_after_speak: false,
            tts_fallback_spoken: false,
            turns: 0,
            reached_listening: false,
            connect_failure: false,
            fatal_error: None,
            call_started_emitted: false,
            started: now,
            answered: None,
            last_audio: now,
            llm_deadline: None,
            tts_warn_deadline: None,
            tts_fallback_deadline: None,
            tts_first_frame_seen: false,
            last_stt_failure: None,
            last_llm_failure: None,
            last_tts_failure: None,
        };
        (session, cmd_tx, state_rx)
    }

    /// Runs the call to completion and returns its outcome.
    pub async fn run(mut self) -> CallOutcome {
        if self.wait_for_switch().await {
            self.begin_call().await;

            let mut tick = tokio::time::interval(Duration::from_millis(250));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            while !matches!(self.state, CallState::HangingUp | CallState::Ended) {
                tokio::select! {
                    cmd = self.cmd_rx.recv() => match cmd {
                        Some(SessionCommand::Hangup) | None => {
                            info!(call_id = %self.call_id, "hangup requested");
                            self.begin_hangup(None);
                        }
                        Some(SessionCommand::AttachSwitch(_)) => {
                            warn!(call_id = %self.call_id, "duplicate switch attach ignored");
                        }
                    },
                    frame = recv_or_pending(self.audio_rx.as_mut()) => match frame {
                        Some(pcm) => self.on_switch_audio(pcm),
                        None => self.on_switch_disconnect(),
                    },
                    msg = recv_or_pending(self.control_rx.as_mut()) => match msg {
                        Some(msg) => self.on_control(msg).await,
                        None => self.control_rx = None,
                    },
                    event = recv_or_pending(self.stt.as_mut().map(|s| &mut s.events)) => match event {
                        Some(event) => self.on_stt(event).await,
                        None => {
                            self.stt = None;
                            self.on_stt_error("transcription stream closed".to_string()).await;
                        }
                    },
                    event = recv_or_pending(self.llm.as_mut().map(|l| &mut l.events)) => match event {
                        Some(event) => self.on_llm(event).await,
                        None => self.llm = None,
                    },
                    event = recv_or_pending(self.tts_events.as_mut()) => match event {
                        Some(event) => self.on_tts(event).await,
                        None => self.clear_tts(),
                    },
                    _ = tick.tick() => self.on_tick().await,
                }
            }
        }

        self.finish().await
    }

    // --- setup ---

    /// PENDING: waits for the switch to connect (bounded), or for a hangup.
    async fn wait_for_switch(&mut self) -> bool {
        let deadline = Instant::now() + self.timings.connect_timeout;
        tokio::select! {
            cmd = self.cmd_rx.recv() => match cmd {
                Some(SessionCommand::AttachSwitch(link)) => {
                    let link = *link;
                    self.audio_rx = Some(link.audio_rx);
                    self.control_rx = Some(link.control_rx);
                    self.frames_tx = Some(link.frames_tx);
                    self.answered = Some(Instant::now());
                    self.last_audio = Instant::now();
                    if let Err(e) = self
                        .ctx
                        .store
                        .mark_call_active(
                            &self.call_id,
                            link.switch_uuid.as_deref(),
                            link.caller_number.as_deref(),
                            link.called_number.as_deref(),
                            &now_iso(),
                        )
                        .await
                    {
                        warn!(call_id = %self.call_id, error = %e, "failed to mark call active");
                    }
                    true
                }
                Some(SessionCommand::Hangup) | None => {
                    self.connect_failure = true;
                    self.begin_hangup(None);
                    false
                }
            },
            _ = tokio::time::sleep_until(deadline) => {
                warn!(call_id = %self.call_id, "switch never connected");
                self.connect_failure = true;
                self.begin_hangup(Some("switch connect timeout".to_string()));
                false
            }
        }
    }

    /// Opens STT and starts the greeting (or goes straight to listening).
    async fn begin_call(&mut self) {
        if !self.open_stt().await {
            return;
        }

        match self.prompt.greeting_text.clone() {
            Some(text) if !text.trim().is_empty() => self.start_greeting(&text).await,
            _ => {
                self.emit_call_started();
                self.set_state(CallState::Listening);
            }
        }
    }

    async fn open_stt(&mut self) -> bool {
        match self.ctx.stt.open(&self.ctx.language).await {
            Ok(session) => {
                self.stt = Some(session);
                true
            }
            Err(first) => {
                warn!(call_id = %self.call_id, error = %first, "STT open failed, retrying once");
                match self.ctx.stt.open(&self.ctx.language).await {
                    Ok(session) => {
                        self.stt = Some(session);
                        true
                    }
                    Err(second) => {
                        self.begin_hangup(Some(format!("STT unavailable: {second}")));
                        false
                    }
                }
            }
        }
    }

    async fn start_greeting(&mut self, text: &str) {
        self.speaking_greeting = true;
        self.assistant_text = text.to_string();
        self.spoken_frames = 0;

        if let Some(pcm) = self.ctx.greetings.get(&self.prompt.voice_id, text) {
            let stream = greeting::playback_stream(pcm);
            self.tts_events = Some(stream.events);
            self.tts_cancel = Some(stream.cancel);
            self.tts_text = None;
            self.greeting_capture = None;
            self.tts_first_frame_seen = true;
        } else if self.start_tts().await {
            self.greeting_capture = Some(Vec::new());
            let text = text.to_string();
            if let Some(tx) = self.tts_text.take()
                && tx.send(text).await.is_err()
            {
                warn!(call_id = %self.call_id, "greeting synthesis rejected input");
            }
            // Input closed: the stream flushes and emits Done.
        } else {
            return;
        }

        self.emit_call_started();
        self.set_state(CallState::Greeting);
    }

    /// Starts a TTS stream, enforcing the single-flight invariant.
    async fn start_tts(&mut self) -> bool {
        self.cancel_tts();
        match self.ctx.tts.synthesize(&self.prompt.voice_id).await {
            Ok(stream) => {
                self.tts_text = Some(stream.text_tx);
                self.tts_events = Some(stream.events);
                self.tts_cancel = Some(stream.cancel);
                self.tts_first_frame_seen = false;
                let now = Instant::now();
                self.tts_warn_deadline = Some(now + self.timings.tts_first_frame_warn);
                self.tts_fallback_deadline = Some(now + self.timings.tts_first_frame_timeout);
                true
            }
            Err(e) => {
                self.on_tts_failure(format!("TTS start failed: {e}")).await;
                false
            }
        }
    }

    // --- event handlers ---

    fn on_switch_audio(&mut self, pcm: Bytes) {
        self.last_audio = Instant::now();
        if let Some(stt) = &self.stt {
            // Never block the turn loop on STT backpressure; a dropped
            // frame costs less than a stalled call.
            let _ = stt.audio_tx.try_send(pcm);
        }
    }

    async fn on_control(&mut self, msg: SwitchControlMsg) {
        match msg {
            SwitchControlMsg::Metadata { uuid, caller, called } => {
                if let Err(e) = self
                    .ctx
                    .store
                    .mark_call_active(
                        &self.call_id,
                        uuid.as_deref(),
                        caller.as_deref(),
                        called.as_deref(),
                        &now_iso(),
                    )
                    .await
                {
                    warn!(call_id = %self.call_id, error = %e, "metadata update failed");
                }
            }
            SwitchControlMsg::Dtmf { digit } => {
                info!(call_id = %self.call_id, digit = %digit, "DTMF received");
            }
            SwitchControlMsg::Hangup => {
                info!(call_id = %self.call_id, "switch sent hangup");
                self.begin_hangup(None);
            }
        }
    }

    fn on_switch_disconnect(&mut self) {
        info!(call_id = %self.call_id, "switch disconnected");
        self.audio_rx = None;
        self.control_rx = None;
        self.frames_tx = None;
        self.begin_hangup(None);
    }

    async fn on_stt(&mut self, event: SttEvent) {
        match event {
            SttEvent::Interim { text } => {
                self.last_audio = Instant::now();
                if matches!(self.state, CallState::Greeting | CallState::Speaking)
                    && text.chars().count() > self.timings.barge_in_min_chars
                {
                    self.barge_in().await;
                }
            }
            SttEvent::Final { text, duration_ms } => {
                self.last_audio = Instant::now();
                match self.state {
                    CallState::Greeting | CallState::Speaking => {
                        if text.chars().count() > self.timings.barge_in_min_chars {
                            self.barge_in().await;
                            self.buffer_user_final(&text, duration_ms);
                        }
                    }
                    CallState::Listening => self.buffer_user_final(&text, duration_ms),
                    CallState::Thinking => {
                        debug!(call_id = %self.call_id, "speech ignored while thinking");
                    }
                    _ => {}
                }
            }
            SttEvent::UtteranceEnd => {
                if self.state == CallState::Listening && !self.pending_user.trim().is_empty() {
                    self.start_turn().await;
                }
            }
            SttEvent::SpeechStarted => {
                self.last_audio = Instant::now();
            }
            SttEvent::Error(e) => self.on_stt_error(e).await,
        }
    }

    fn buffer_user_final(&mut self, text: &str, duration_ms: u64) {
        if !self.pending_user.is_empty() {
            self.pending_user.push(' ');
        }
        self.pending_user.push_str(text.trim());
        self.pending_user_ms += duration_ms;
    }

    async fn on_stt_error(&mut self, error: String) {
        if self.recent(self.last_stt_failure) {
            self.begin_hangup(Some(format!("STT failed twice: {error}")));
            return;
        }
        warn!(call_id = %self.call_id, error = %error, "STT error, reconnecting");
        self.last_stt_failure = Some(Instant::now());
        if let Some(old) = self.stt.take() {
            old.cancel.cancel();
        }
        match self.ctx.stt.open(&self.ctx.language).await {
            Ok(session) => self.stt = Some(session),
            Err(e) => self.begin_hangup(Some(format!("STT reconnect failed: {e}"))),
        }
    }

    /// LISTENING → THINKING: commit the buffered user utterance and open
    /// an LLM stream over the committed transcript.
    async fn start_turn(&mut self) {
        let content = std::mem::take(&mut self.pending_user).trim().to_string();
        let audio_ms = std::mem::take(&mut self.pending_user_ms);
        self.commit_entry(Role::User, content, Some(audio_ms)).await;

        self.set_state(CallState::Thinking);
        self.assistant_text.clear();
        self.spoken_frames = 0;
        self.start_llm().await;
    }

    async fn start_llm(&mut self) {
        let request = self.chat_request();
        match self.ctx.llm.stream_chat(request).await {
            Ok(stream) => {
                self.llm = Some(stream);
                self.llm_deadline = Some(Instant::now() + self.timings.llm_first_token_timeout);
            }
            Err(e) => {
                if self.recent(self.last_llm_failure) {
                    self.begin_hangup(Some(format!("LLM failed twice: {e}")));
                } else {
                    warn!(call_id = %self.call_id, error = %e, "LLM unavailable, apologizing");
                    self.last_llm_failure = Some(Instant::now());
                    self.speak_phrase(APOLOGY_PHRASE, false).await;
                }
            }
        }
    }

    /// The LLM input is always the system prompt plus the committed
    /// transcript; interims and in-flight TTS text are excluded.
    fn chat_request(&self) -> ChatRequest {
        let mut messages = vec![ChatMessage::system(&self.prompt.system_prompt)];
        let tail = self
            .transcript
            .iter()
            .rev()
            .take(ROLLING_CONTEXT_ENTRIES)
            .collect::<Vec<_>>();
        for entry in tail.into_iter().rev() {
            messages.push(ChatMessage {
                role: entry.role.to_string(),
                content: entry.content.clone(),
            });
        }
        ChatRequest {
            model: self.prompt.llm_model.clone(),
            temperature: self.prompt.temperature,
            messages,
        }
    }

    async fn on_llm(&mut self, event: LlmEvent) {
        match event {
            LlmEvent::Delta(text) => {
                if self.state == CallState::Thinking {
                    self.llm_deadline = None;
                    if !self.start_tts().await {
                        return;
                    }
                    self.set_state(CallState::Speaking);
                }
                if self.state == CallState::Speaking {
                    self.assistant_text.push_str(&text);
                    if let Some(tx) = &self.tts_text
                        && tx.send(text).await.is_err()
                    {
                        debug!(call_id = %self.call_id, "TTS input closed mid-stream");
                    }
                }
            }
            LlmEvent::Done { full_text } => {
                self.llm = None;
                self.llm_deadline = None;
                match self.state {
                    CallState::Thinking => {
                        // Stream finished without a single delta.
                        if full_text.trim().is_empty() {
                            info!(call_id = %self.call_id, "empty LLM reply, using fallback");
                            self.speak_phrase(EMPTY_REPLY_PHRASE, false).await;
                        } else {
                            self.assistant_text = full_text.clone();
                            if self.start_tts().await {
                                self.set_state(CallState::Speaking);
                                if let Some(tx) = self.tts_text.take() {
                                    let _ = tx.send(full_text).await;
                                }
                            }
                        }
                    }
                    CallState::Speaking => {
                        self.assistant_text = full_text;
                        // Close TTS input; the stream flushes and emits Done.
                        self.tts_text = None;
                    }
                    _ => {}
                }
            }
            LlmEvent::Error(e) => {
                self.llm = None;
                self.llm_deadline = None;
                match self.state {
                    CallState::Thinking => {
                        if self.recent(self.last_llm_failure) {
                            self.begin_hangup(Some(format!("LLM failed twice: {e}")));
                        } else {
                            warn!(call_id = %self.call_id, error = %e, "LLM stream error, retrying");
                            self.last_llm_failure = Some(Instant::now());
                            self.start_llm().await;
                        }
                    }
                    CallState::Speaking => {
                        // Keep what was generated; let TTS finish it.
                        warn!(call_id = %self.call_id, error = %e, "LLM died mid-reply");
                        self.tts_text = None;
                    }
                    _ => {}
                }
            }
        }
    }

    async fn on_tts(&mut self, event: TtsEvent) {
        match event {
            TtsEvent::Frame(pcm) => {
                if !self.tts_first_frame_seen {
                    self.tts_first_frame_seen = true;
                    self.tts_warn_deadline = None;
                    self.tts_fallback_deadline = None;
                }
                self.last_audio = Instant::now();
                self.spoken_frames += 1;
                if let Some(capture) = &mut self.greeting_capture {
                    capture.extend_from_slice(&pcm);
                }
                if let Some(tx) = &self.frames_tx {
                    // Bounded queue: awaiting here is the backpressure that
                    // holds TTS to telephony real time.
                    if tx.send(pcm).await.is_err() {
                        self.on_switch_disconnect();
                    }
                }
            }
            TtsEvent::Done => self.finish_utterance().await,
            TtsEvent::Error(e) => self.on_tts_failure(e).await,
        }
    }

    /// SPEAKING/GREETING completed without barge-in.
    async fn finish_utterance(&mut self) {
        let audio_ms = self.spoken_frames * FRAME_MS;
        let content = std::mem::take(&mut self.assistant_text);
        self.commit_entry(Role::Assistant, content, Some(audio_ms)).await;

        if self.speaking_greeting {
            self.speaking_greeting = false;
            if let Some(pcm) = self.greeting_capture.take() {
                if let Some(text) = &self.prompt.greeting_text {
                    let duration = greeting::pcm_duration_ms(&pcm) as f64;
                    self.ctx
                        .greetings
                        .insert(&self.prompt.voice_id, text, Bytes::from(pcm));
                    if let Some(prompt_id) = self.prompt.prompt_id
                        && let Err(e) = self.ctx.store.set_greeting_duration(prompt_id, duration).await
                    {
                        warn!(call_id = %self.call_id, error = %e, "greeting duration not saved");
                    }
                }
            }
        } else {
            self.turns += 1;
        }

        self.clear_tts();
        self.spoken_frames = 0;

        if self.hang_after_speak {
            self.begin_hangup(None);
        } else {
            self.set_state(CallState::Listening);
        }
    }

    async fn on_tts_failure(&mut self, error: String) {
        if self.recent(self.last_tts_failure) {
            self.begin_hangup(Some(format!("TTS failed twice: {error}")));
            return;
        }
        warn!(call_id = %self.call_id, error = %error, "TTS failure");
        self.last_tts_failure = Some(Instant::now());
        if let Some(llm) = self.llm.take() {
            llm.cancel.cancel();
        }

        if self.hang_after_speak {
            // The farewell itself failed; nothing left to say.
            self.begin_hangup(None);
            return;
        }

        // Salvage the partially delivered utterance, then listen again.
        self.commit_truncated_assistant().await;
        self.speaking_greeting = false;
        self.greeting_capture = None;
        self.clear_tts();
        self.set_state(CallState::Listening);
    }

    /// User spoke while the assistant was audible: cancel both streams,
    /// commit the delivered portion, return to LISTENING.
    async fn barge_in(&mut self) {
        info!(call_id = %self.call_id, frames = self.spoken_frames, "barge-in");
        if let Some(llm) = self.llm.take() {
            llm.cancel.cancel();
        }
        self.llm_deadline = None;
        self.cancel_tts();
        self.commit_truncated_assistant().await;
        self.speaking_greeting = false;
        self.greeting_capture = None;
        self.set_state(CallState::Listening);
    }

    /// Commits the in-progress assistant entry truncated to the text
    /// actually delivered (estimated from frames sent × speech rate).
    async fn commit_truncated_assistant(&mut self) {
        let delivered_ms = self.spoken_frames * FRAME_MS;
        let est_chars = (delivered_ms as f64 * ASSISTANT_CHARS_PER_SEC / 1000.0).round() as usize;
        let spoken = truncate_chars(&self.assistant_text, est_chars);
        self.assistant_text.clear();
        self.spoken_frames = 0;
        if !spoken.is_empty() {
            if !self.speaking_greeting {
                self.turns += 1;
            }
            self.commit_entry(Role::Assistant, spoken, Some(delivered_ms)).await;
        }
    }

    async fn commit_entry(&mut self, role: Role, content: String, audio_ms: Option<u64>) {
        let entry = TranscriptEntry {
            role,
            content,
            ts: now_iso(),
            audio_ms,
        };
        self.transcript.push(entry.clone());
        if let Err(e) = self.ctx.store.append_message(&self.call_id, &entry).await {
            // The session continues in memory; teardown re-flushes.
            warn!(call_id = %self.call_id, error = %e, "transcript persist failed");
            self.unflushed.push(entry);
        }
    }

    /// Cancels any fallback/farewell and speaks a canned phrase.
    async fn speak_phrase(&mut self, phrase: &str, hang_after: bool) {
        if let Some(llm) = self.llm.take() {
            llm.cancel.cancel();
        }
        self.assistant_text = phrase.to_string();
        self.spoken_frames = 0;
        self.speaking_greeting = false;
        self.hang_after_speak = self.hang_after_speak || hang_after;

        if self.start_tts().await {
            self.set_state(CallState::Speaking);
            if let Some(tx) = self.tts_text.take() {
                let _ = tx.send(phrase.to_string()).await;
            }
        }
    }

    async fn on_tick(&mut self) {
        let now = Instant::now();

        if self.state == CallState::Listening
            && !self.hang_after_speak
            && now.duration_since(self.last_audio) >= self.timings.inactivity_timeout
        {
            info!(call_id = %self.call_id, "inactivity timeout, saying goodbye");
            self.speak_phrase(FAREWELL_PHRASE, true).await;
            return;
        }

        if self.state == CallState::Thinking
            && let Some(deadline) = self.llm_deadline
            && now >= deadline
        {
            warn!(call_id = %self.call_id, "LLM first token overdue, apologizing");
            self.llm_deadline = None;
            if let Some(llm) = self.llm.take() {
                llm.cancel.cancel();
            }
            self.speak_phrase(APOLOGY_PHRASE, false).await;
            return;
        }

        if self.tts_events.is_some() && !self.tts_first_frame_seen {
            if let Some(deadline) = self.tts_warn_deadline
                && now >= deadline
            {
                warn!(call_id = %self.call_id, "TTS first frame late");
                self.tts_warn_deadline = None;
            }
            if let Some(deadline) = self.tts_fallback_deadline
                && now >= deadline
            {
                self.tts_fallback_deadline = None;
                if self.tts_fallback_spoken || self.hang_after_speak {
                    self.begin_hangup(Some("TTS produced no audio".to_string()));
                } else {
                    self.tts_fallback_spoken = true;
                    self.speak_phrase(APOLOGY_PHRASE, false).await;
                }
            }
        }
    }

    // --- teardown ---

    fn begin_hangup(&mut self, fatal: Option<String>) {
        if let Some(error) = fatal {
            self.fatal_error.get_or_insert(error);
        }
        if !matches!(self.state, CallState::HangingUp | CallState::Ended) {
            self.set_state(CallState::HangingUp);
        }
    }

    fn cancel_tts(&mut self) {
        if let Some(cancel) = self.tts_cancel.take() {
            cancel.cancel();
        }
        self.tts_text = None;
        self.tts_events = None;
        self.tts_warn_deadline = None;
        self.tts_fallback_deadline = None;
    }

    fn clear_tts(&mut self) {
        self.tts_cancel = None;
        self.tts_text = None;
        self.tts_events = None;
        self.tts_warn_deadline = None;
        self.tts_fallback_deadline = None;
    }

    async fn finish(mut self) -> CallOutcome {
        if !matches!(self.state, CallState::HangingUp) {
            self.set_state(CallState::HangingUp);
        }

        // Commit whatever the caller actually heard or said before teardown.
        if self.tts_events.is_some() && self.spoken_frames > 0 {
            self.commit_truncated_assistant().await;
        }
        if !self.pending_user.trim().is_empty() {
            let content = std::mem::take(&mut self.pending_user).trim().to_string();
            let audio_ms = std::mem::take(&mut self.pending_user_ms);
            self.commit_entry(Role::User, content, Some(audio_ms)).await;
        }

        // Cancel all provider streams and drain them, bounded.
        if let Some(stt) = &self.stt {
            stt.cancel.cancel();
        }
        if let Some(llm) = &self.llm {
            llm.cancel.cancel();
        }
        if let Some(cancel) = &self.tts_cancel {
            cancel.cancel();
        }
        self.tts_text = None;
        let drain = self.timings.drain_timeout;
        let stt = self.stt.take();
        let llm = self.llm.take();
        let tts_events = self.tts_events.take();
        let _ = tokio::time::timeout(drain, async {
            if let Some(mut stt) = stt {
                while stt.events.recv().await.is_some() {}
            }
            if let Some(mut llm) = llm {
                while llm.events.recv().await.is_some() {}
            }
            if let Some(mut events) = tts_events {
                while events.recv().await.is_some() {}
            }
        })
        .await;

        self.audio_rx = None;
        self.control_rx = None;
        self.frames_tx = None;

        let status = if self.fatal_error.is_some() {
            TerminalStatus::Failed
        } else if self.turns > 0 {
            TerminalStatus::Completed
        } else {
            TerminalStatus::Failed
        };
        let duration_seconds = self
            .answered
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        // Second chance for entries a transient storage failure dropped.
        for entry in std::mem::take(&mut self.unflushed) {
            if let Err(e) = self.ctx.store.append_message(&self.call_id, &entry).await {
                warn!(call_id = %self.call_id, error = %e, "transcript entry lost");
            }
        }

        if let Err(e) = self
            .ctx
            .store
            .finalize_call(&self.call_id, status, &now_iso(), duration_seconds, None)
            .await
        {
            warn!(call_id = %self.call_id, error = %e, "finalize_call failed");
        }

        if let Some(error) = &self.fatal_error {
            self.emit(
                EventKind::CallFailed,
                serde_json::json!({ "call_id": self.call_id, "error": error }),
            );
        }
        let outcome = CallOutcome {
            status,
            reached_listening: self.reached_listening,
            connect_failure: self.connect_failure,
            duration_seconds,
            error: self.fatal_error.clone(),
        };
        let transcript = serde_json::to_value(&self.transcript)
            .unwrap_or_else(|_| serde_json::Value::Array(Vec::new()));
        let _ = self
            .ctx
            .bus
            .send(LifecycleEvent::call_ended(&self.call_id, &outcome, transcript));

        self.set_state(CallState::Ended);
        info!(
            call_id = %self.call_id,
            status = %outcome.status,
            turns = self.turns,
            duration_s = format!("{duration_seconds:.1}"),
            "call ended"
        );
        outcome
    }

    // --- plumbing ---

    fn set_state(&mut self, next: CallState) {
        if self.state == next {
            return;
        }
        debug!(call_id = %self.call_id, from = %self.state, to = %next, "state transition");
        self.state = next;
        let _ = self.state_tx.send(next);
        if next == CallState::Listening {
            self.reached_listening = true;
            // Listening restarts the inactivity clock.
            self.last_audio = Instant::now();
        }
        if next != CallState::Ended {
            self.emit(
                EventKind::CallStateChanged,
                serde_json::json!({ "call_id": self.call_id, "state": next }),
            );
        }
    }

    fn emit_call_started(&mut self) {
        if self.call_started_emitted {
            return;
        }
        self.call_started_emitted = true;
        self.emit(
            EventKind::CallStarted,
            serde_json::json!({
                "call_id": self.call_id,
                "direction": self.direction,
            }),
        );
    }

    fn emit(&self, kind: EventKind, data: serde_json::Value) {
        let _ = self
            .ctx
            .bus
            .send(LifecycleEvent::now(kind, Some(self.call_id.clone()), data));
    }

    fn recent(&self, failure: Option<Instant>) -> bool {
        failure.is_some_and(|t| t.elapsed() < PROVIDER_REFAIL_WINDOW)
    }
}
