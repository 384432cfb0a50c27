// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Language-model adapter trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// One chat message. Roles are the wire strings "system", "user",
/// "assistant"; the first message is the system prompt and the last is
/// always user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".into(), content: content.into() }
    }
}

/// A streaming chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub temperature: f64,
    pub messages: Vec<ChatMessage>,
}

/// Events emitted by a streaming completion.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmEvent {
    /// Incremental token text.
    Delta(String),
    /// Terminal event carrying the assembled full text.
    Done { full_text: String },
    /// Stream-level failure.
    Error(String),
}

/// Handle to one in-flight completion stream.
///
/// Cancelling the token aborts the underlying transfer at the next token
/// boundary, stopping upstream billing promptly, and closes `events`.
pub struct LlmStream {
    pub events: mpsc::Receiver<LlmEvent>,
    pub cancel: CancellationToken,
}

/// Adapter for streaming chat-completion providers.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn stream_chat(&self, request: ChatRequest) -> Result<LlmStream>;
}
