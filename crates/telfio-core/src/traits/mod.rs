// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter traits decoupling the session engine from concrete providers.

pub mod llm;
pub mod store;
pub mod stt;
pub mod switch;
pub mod tts;

pub use llm::{ChatMessage, ChatRequest, LanguageModel, LlmEvent, LlmStream};
pub use store::{
    CallMessageRow, CallRow, CallStore, CampaignRow, ContactCounts, ContactRow, ImportSummary,
    NewCall, NewCampaign, NewContact, NewPrompt, NewScheduledCall, NewWebhookConfig,
    NewWebhookLog, PromptRow, ScheduledCallRow, SettingRow, WebhookConfigRow, WebhookLogRow,
};
pub use stt::{SpeechToText, SttEvent, SttSession};
pub use switch::SwitchControl;
pub use tts::{TextToSpeech, TtsEvent, TtsStream};
