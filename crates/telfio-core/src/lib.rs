// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core types, errors, and adapter traits for the Telfio voice agent.
//!
//! This crate has no provider, storage, or transport dependencies; it
//! defines the seams the rest of the workspace plugs into.

pub mod error;
pub mod events;
pub mod traits;
pub mod types;

pub use error::{Result, TelfioError};
pub use events::{EventKind, LifecycleEvent};
pub use traits::{
    CallStore, LanguageModel, SpeechToText, SwitchControl, TextToSpeech,
};
pub use types::{
    CallOutcome, CallState, Direction, PromptSnapshot, Role, TerminalStatus, TranscriptEntry,
    FRAME_BYTES, FRAME_MS, FRAME_SAMPLES, SAMPLE_RATE,
};
