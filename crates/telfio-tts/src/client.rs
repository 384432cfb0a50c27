// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Streaming text-to-speech client.
//!
//! Text arrives incrementally, is batched by sentence boundary, and each
//! batch is synthesized via an HTTP streaming endpoint returning raw
//! linear16 PCM at 8 kHz mono. Audio is re-framed into exact 20 ms frames
//! (320 bytes); the trailing partial frame is zero-padded.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use telfio_core::traits::{TextToSpeech, TtsEvent, TtsStream};
use telfio_core::{FRAME_BYTES, Result, SAMPLE_RATE, TelfioError};

use crate::chunker::SentenceChunker;

/// Streaming synthesis client (Murf-style dialect).
#[derive(Debug, Clone)]
pub struct HttpTtsClient {
    client: reqwest::Client,
    base_url: String,
    style: String,
}

impl HttpTtsClient {
    pub fn new(api_key: &str, base_url: &str, style: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "api-key",
            HeaderValue::from_str(api_key)
                .map_err(|e| TelfioError::Config(format!("invalid TTS API key: {e}")))?,
        );
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TelfioError::Provider {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            style: style.to_string(),
        })
    }

    fn stream_url(&self) -> String {
        format!("{}/speech/stream", self.base_url)
    }
}

#[async_trait]
impl TextToSpeech for HttpTtsClient {
    async fn synthesize(&self, voice_id: &str) -> Result<TtsStream> {
        let (text_tx, text_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let worker = Worker {
            client: self.client.clone(),
            url: self.stream_url(),
            voice_id: voice_id.to_string(),
            style: self.style.clone(),
        };
        tokio::spawn(worker.run(text_rx, event_tx, cancel.clone()));

        Ok(TtsStream {
            text_tx,
            events: event_rx,
            cancel,
        })
    }
}

struct Worker {
    client: reqwest::Client,
    url: String,
    voice_id: String,
    style: String,
}

impl Worker {
    /// Consumes text until the sender closes, synthesizing batch by batch.
    async fn run(
        self,
        mut text_rx: mpsc::Receiver<String>,
        events: mpsc::Sender<TtsEvent>,
        cancel: CancellationToken,
    ) {
        let mut chunker = SentenceChunker::new();
        let mut framer = FrameBuffer::default();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                text = text_rx.recv() => match text {
                    Some(text) => {
                        for batch in chunker.push(&text) {
                            if !self.speak_batch(&batch, &mut framer, &events, &cancel).await {
                                return;
                            }
                        }
                    }
                    None => break,
                }
            }
        }

        if let Some(rest) = chunker.flush()
            && !self.speak_batch(&rest, &mut framer, &events, &cancel).await
        {
            return;
        }

        if let Some(last) = framer.finish()
            && events.send(TtsEvent::Frame(last)).await.is_err()
        {
            return;
        }
        let _ = events.send(TtsEvent::Done).await;
    }

    /// Synthesizes one batch and emits its frames. Returns false when the
    /// stream is cancelled, the receiver is gone, or the provider failed.
    async fn speak_batch(
        &self,
        text: &str,
        framer: &mut FrameBuffer,
        events: &mpsc::Sender<TtsEvent>,
        cancel: &CancellationToken,
    ) -> bool {
        debug!(chars = text.len(), voice = %self.voice_id, "synthesizing batch");

        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "text": text,
                "voiceId": self.voice_id,
                "style": self.style,
                "format": "PCM",
                "sampleRate": SAMPLE_RATE,
                "channelType": "MONO",
                "encodeAsBase64": false,
            }))
            .send()
            .await;

        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                let status = r.status();
                let body = r.text().await.unwrap_or_default();
                let _ = events
                    .send(TtsEvent::Error(format!("TTS API error {status}: {body}")))
                    .await;
                return false;
            }
            Err(e) => {
                let _ = events
                    .send(TtsEvent::Error(format!("TTS request failed: {e}")))
                    .await;
                return false;
            }
        };

        let mut body = response.bytes_stream();
        loop {
            tokio::select! {
                // Cancellation wins the race: emission stops within one
                // frame and dropping the body aborts the provider transfer.
                _ = cancel.cancelled() => return false,
                chunk = body.next() => match chunk {
                    Some(Ok(audio)) => {
                        for frame in framer.push(&audio) {
                            if cancel.is_cancelled() {
                                return false;
                            }
                            if events.send(TtsEvent::Frame(frame)).await.is_err() {
                                return false;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "TTS body stream error");
                        let _ = events
                            .send(TtsEvent::Error(format!("TTS stream error: {e}")))
                            .await;
                        return false;
                    }
                    None => return true,
                }
            }
        }
    }
}

/// Re-frames arbitrary PCM chunks into exact 320-byte frames, carrying the
/// remainder across chunks and batches.
#[derive(Debug, Default)]
struct FrameBuffer {
    carry: BytesMut,
}

impl FrameBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.carry.extend_from_slice(chunk);
        let mut frames = Vec::with_capacity(self.carry.len() / FRAME_BYTES);
        while self.carry.len() >= FRAME_BYTES {
            frames.push(self.carry.split_to(FRAME_BYTES).freeze());
        }
        frames
    }

    /// Zero-pads and returns the trailing partial frame, if any.
    fn finish(&mut self) -> Option<Bytes> {
        if self.carry.is_empty() {
            return None;
        }
        self.carry.resize(FRAME_BYTES, 0);
        Some(self.carry.split().freeze())
    }
}
