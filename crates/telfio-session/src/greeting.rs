// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-wide greeting audio cache.
//!
//! Greeting synthesis is the first audible latency of every call, so
//! synthesized PCM is cached keyed by `(voice_id, text)`: populate once,
//! then read. Hot prompt edits produce a new key, never a mutation.

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use telfio_core::traits::{TtsEvent, TtsStream};
use telfio_core::{FRAME_BYTES, FRAME_MS};

/// Cache of synthesized greeting audio (raw 8 kHz linear16 PCM).
#[derive(Default)]
pub struct GreetingCache {
    inner: DashMap<(String, String), Bytes>,
}

impl GreetingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, voice_id: &str, text: &str) -> Option<Bytes> {
        self.inner
            .get(&(voice_id.to_string(), text.to_string()))
            .map(|pcm| pcm.clone())
    }

    pub fn insert(&self, voice_id: &str, text: &str, pcm: Bytes) {
        self.inner
            .insert((voice_id.to_string(), text.to_string()), pcm);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Duration of a PCM buffer in milliseconds.
pub fn pcm_duration_ms(pcm: &[u8]) -> u64 {
    (pcm.len() / FRAME_BYTES) as u64 * FRAME_MS
}

/// Wraps cached PCM in a [`TtsStream`]-shaped playback so the session's
/// turn loop treats cached greetings exactly like live synthesis.
pub fn playback_stream(pcm: Bytes) -> TtsStream {
    let (text_tx, _text_rx) = mpsc::channel(1);
    let (event_tx, event_rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();

    tokio::spawn(async move {
        let mut offset = 0;
        while offset + FRAME_BYTES <= pcm.len() {
            if task_cancel.is_cancelled() {
                return;
            }
            let frame = pcm.slice(offset..offset + FRAME_BYTES);
            offset += FRAME_BYTES;
            tokio::select! {
                _ = task_cancel.cancelled() => return,
                sent = event_tx.send(TtsEvent::Frame(frame)) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
        let _ = event_tx.send(TtsEvent::Done).await;
    });

    TtsStream {
        text_tx,
        events: event_rx,
        cancel,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_is_keyed_by_voice_and_text() {
        let cache = GreetingCache::new();
        cache.insert("voz-a", "Olá!", Bytes::from(vec![0u8; FRAME_BYTES]));

        assert!(cache.get("voz-a", "Olá!").is_some());
        assert!(cache.get("voz-b", "Olá!").is_none());
        assert!(cache.get("voz-a", "Oi!").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn duration_is_frame_aligned() {
        assert_eq!(pcm_duration_ms(&vec![0u8; FRAME_BYTES * 50]), 1000);
        assert_eq!(pcm_duration_ms(&[]), 0);
    }

    #[tokio::test]
    async fn playback_emits_all_frames_then_done() {
        let pcm = Bytes::from(vec![1u8; FRAME_BYTES * 3]);
        let mut stream = playback_stream(pcm);

        let mut frames = 0;
        while let Some(event) = stream.events.recv().await {
            match event {
                TtsEvent::Frame(frame) => {
                    assert_eq!(frame.len(), FRAME_BYTES);
                    frames += 1;
                }
                TtsEvent::Done => break,
                TtsEvent::Error(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(frames, 3);
    }

    #[tokio::test]
    async fn playback_cancel_stops_stream() {
        let pcm = Bytes::from(vec![1u8; FRAME_BYTES * 100]);
        let mut stream = playback_stream(pcm);

        let first = stream.events.recv().await;
        assert!(matches!(first, Some(TtsEvent::Frame(_))));
        stream.cancel.cancel();

        // Channel closes without Done.
        let mut saw_done = false;
        while let Some(event) = stream.events.recv().await {
            if matches!(event, TtsEvent::Done) {
                saw_done = true;
            }
        }
        assert!(!saw_done);
    }
}
