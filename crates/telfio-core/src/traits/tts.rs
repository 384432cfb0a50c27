// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Text-to-speech adapter trait.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Events emitted by a synthesis stream.
#[derive(Debug, Clone, PartialEq)]
pub enum TtsEvent {
    /// Exactly one 20 ms frame: 320 bytes of linear16 PCM at 8 kHz mono.
    Frame(Bytes),
    /// All queued text has been synthesized and emitted.
    Done,
    /// Stream-level failure.
    Error(String),
}

/// Handle to one in-flight synthesis stream.
///
/// Text is fed incrementally on `text_tx`; dropping the sender marks end of
/// input, after which the stream flushes remaining audio and emits `Done`.
/// Cancelling the token is idempotent, stops frame emission within one
/// frame, and drains the provider.
pub struct TtsStream {
    pub text_tx: mpsc::Sender<String>,
    pub events: mpsc::Receiver<TtsEvent>,
    pub cancel: CancellationToken,
}

/// Adapter for streaming text-to-speech providers.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Starts a synthesis stream for the given voice.
    async fn synthesize(&self, voice_id: &str) -> Result<TtsStream>;
}
