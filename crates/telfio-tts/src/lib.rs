// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Streaming text-to-speech client implementing [`telfio_core::TextToSpeech`].

pub mod chunker;
pub mod client;

pub use client::HttpTtsClient;
