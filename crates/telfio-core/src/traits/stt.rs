// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Speech-to-text adapter trait.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Ordered events emitted by a live transcription stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SttEvent {
    /// Partial hypothesis, subject to revision. Never persisted; used for
    /// barge-in detection.
    Interim { text: String },
    /// Locked-in transcript for an utterance segment.
    Final { text: String, duration_ms: u64 },
    /// The provider (or the client's 700 ms watchdog) decided the utterance
    /// is over.
    UtteranceEnd,
    /// Voice activity began.
    SpeechStarted,
    /// Stream-level failure. The session applies its reconnect-once policy.
    Error(String),
}

/// Handle to one continuous transcription stream.
///
/// Audio frames go in on `audio_tx`; events come out on `events`.
/// Cancelling the token is idempotent: it stops outbound sends and drains
/// the inbound event channel, after which `events` yields `None`.
pub struct SttSession {
    pub audio_tx: mpsc::Sender<Bytes>,
    pub events: mpsc::Receiver<SttEvent>,
    pub cancel: CancellationToken,
}

/// Adapter for streaming speech-to-text providers.
///
/// One stream serves the whole call: providers must support continuous
/// streaming without per-utterance reopen.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Opens a transcription stream for linear16 audio at the engine's
    /// fixed 8 kHz sample rate.
    async fn open(&self, language: &str) -> Result<SttSession>;
}
