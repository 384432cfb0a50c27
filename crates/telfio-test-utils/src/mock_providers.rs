// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock STT/LLM/TTS adapters for deterministic testing.
//!
//! Each mock hands out handle structs identical to the real providers',
//! driven by scripted inputs instead of network traffic. Tests hold the
//! script senders and feed events at the exact moments a scenario needs.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use telfio_core::traits::{
    ChatRequest, LanguageModel, LlmEvent, LlmStream, SpeechToText, SttEvent, SttSession,
    TextToSpeech, TtsEvent, TtsStream,
};
use telfio_core::{FRAME_BYTES, Result};

/// Mock STT adapter. Each `open` hands the test a script sender; events
/// pushed there appear on the session's event channel verbatim.
pub struct MockStt {
    scripts: Mutex<Vec<mpsc::Sender<SttEvent>>>,
    opened: Arc<AtomicUsize>,
}

impl MockStt {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(Vec::new()),
            opened: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// The script sender for the `n`-th opened stream (0-based).
    pub async fn script(&self, n: usize) -> mpsc::Sender<SttEvent> {
        self.scripts.lock().await[n].clone()
    }

    /// Waits until at least `n` streams were opened.
    pub async fn wait_for_open(&self, n: usize) {
        for _ in 0..500 {
            if self.opened.load(Ordering::SeqCst) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("STT stream {n} was never opened");
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechToText for MockStt {
    async fn open(&self, _language: &str) -> Result<SttSession> {
        let (audio_tx, mut audio_rx) = mpsc::channel::<Bytes>(256);
        let (event_tx, event_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();

        // Swallow audio so senders never block.
        let drain_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = drain_cancel.cancelled() => break,
                    frame = audio_rx.recv() => if frame.is_none() { break },
                }
            }
        });

        self.scripts.lock().await.push(event_tx);
        self.opened.fetch_add(1, Ordering::SeqCst);

        Ok(SttSession {
            audio_tx,
            events: event_rx,
            cancel,
        })
    }
}

/// Mock LLM adapter streaming queued responses as per-word deltas.
pub struct MockLlm {
    responses: Mutex<Vec<String>>,
    /// Delay between deltas; lets barge-in tests interrupt mid-stream.
    delta_delay: Duration,
    cancelled: Arc<AtomicUsize>,
    streams: Arc<AtomicUsize>,
}

impl MockLlm {
    pub fn with_responses(responses: Vec<&str>) -> Arc<Self> {
        Self::paced_with_responses(Duration::from_millis(1), responses)
    }

    pub fn paced_with_responses(delta_delay: Duration, responses: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            delta_delay,
            cancelled: Arc::new(AtomicUsize::new(0)),
            streams: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn cancelled_count(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn stream_count(&self) -> usize {
        self.streams.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for MockLlm {
    async fn stream_chat(&self, _request: ChatRequest) -> Result<LlmStream> {
        let text = {
            let mut responses = self.responses.lock().await;
            if responses.is_empty() {
                "resposta padrão.".to_string()
            } else {
                responses.remove(0)
            }
        };
        self.streams.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let delay = self.delta_delay;
        let task_cancel = cancel.clone();
        let cancelled = self.cancelled.clone();

        tokio::spawn(async move {
            let mut full = String::new();
            for word in text.split_inclusive(' ') {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        cancelled.fetch_add(1, Ordering::SeqCst);
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                full.push_str(word);
                if tx.send(LlmEvent::Delta(word.to_string())).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(LlmEvent::Done { full_text: full }).await;
        });

        Ok(LlmStream { events: rx, cancel })
    }
}

/// Mock TTS adapter emitting one silence frame per character of input,
/// paced so cancellation tests can interrupt mid-utterance.
pub struct MockTts {
    frame_delay: Duration,
    cancelled: Arc<AtomicUsize>,
}

impl MockTts {
    pub fn new() -> Arc<Self> {
        Self::paced(Duration::from_millis(1))
    }

    pub fn paced(frame_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            frame_delay,
            cancelled: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn cancelled_count(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextToSpeech for MockTts {
    async fn synthesize(&self, _voice_id: &str) -> Result<TtsStream> {
        let (text_tx, mut text_rx) = mpsc::channel::<String>(32);
        let (event_tx, event_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let delay = self.frame_delay;
        let task_cancel = cancel.clone();
        let cancelled = self.cancelled.clone();

        tokio::spawn(async move {
            loop {
                let text = tokio::select! {
                    _ = task_cancel.cancelled() => {
                        cancelled.fetch_add(1, Ordering::SeqCst);
                        return;
                    }
                    text = text_rx.recv() => match text {
                        Some(text) => text,
                        None => break,
                    }
                };
                for _ in 0..text.chars().count() {
                    tokio::select! {
                        _ = task_cancel.cancelled() => {
                            cancelled.fetch_add(1, Ordering::SeqCst);
                            return;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    let frame = Bytes::from(vec![0u8; FRAME_BYTES]);
                    if event_tx.send(TtsEvent::Frame(frame)).await.is_err() {
                        return;
                    }
                }
            }
            let _ = event_tx.send(TtsEvent::Done).await;
        });

        Ok(TtsStream {
            text_tx,
            events: event_rx,
            cancel,
        })
    }
}
