// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! OpenAI-compatible streaming chat completions client.
//!
//! Implements [`telfio_core::LanguageModel`] over SSE with transient-error
//! retry and token-boundary cancellation.

pub mod client;
pub mod types;

pub use client::ChatClient;
