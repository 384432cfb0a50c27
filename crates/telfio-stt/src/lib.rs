// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Realtime speech-to-text client implementing [`telfio_core::SpeechToText`].

pub mod client;
pub mod wire;

pub use client::RealtimeSttClient;
