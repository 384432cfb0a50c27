// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed wire messages for the realtime transcription protocol
//! (Deepgram-compatible JSON over WebSocket).

use serde::Deserialize;

/// Messages received from the provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ProviderMessage {
    /// A transcription result, interim or final.
    Results(ResultsMessage),
    /// Provider-side endpointing decided the utterance is over.
    UtteranceEnd {},
    /// Voice activity began.
    SpeechStarted {},
    /// Stream metadata; carries nothing the session needs.
    Metadata {},
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultsMessage {
    pub channel: ResultsChannel,
    #[serde(default)]
    pub is_final: bool,
    /// Audio duration covered by this result, seconds.
    #[serde(default)]
    pub duration: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultsChannel {
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Alternative {
    pub transcript: String,
    #[serde(default)]
    pub confidence: f64,
}

impl ResultsMessage {
    /// Best transcript text, empty when the provider heard nothing.
    pub fn transcript(&self) -> &str {
        self.channel
            .alternatives
            .first()
            .map(|a| a.transcript.as_str())
            .unwrap_or("")
    }
}
