// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Realtime WebSocket transcription client.
//!
//! Opens one continuous stream per call: audio frames go out as binary
//! messages, typed JSON results come back. Endpointing is provider-side;
//! when the provider emits no explicit utterance end, a 700 ms watchdog
//! after the most recent final synthesizes one.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use telfio_core::traits::{SpeechToText, SttEvent, SttSession};
use telfio_core::{Result, SAMPLE_RATE, TelfioError};

use crate::wire::ProviderMessage;

/// Watchdog delay for synthesizing an utterance end after the last final.
const SYNTH_UTTERANCE_END_MS: u64 = 700;

/// Keepalive cadence while no audio is flowing.
const KEEPALIVE_SECS: u64 = 5;

/// Streaming transcription client (Deepgram-compatible dialect).
#[derive(Debug, Clone)]
pub struct RealtimeSttClient {
    api_key: String,
    base_url: String,
    model: String,
    endpointing_ms: u64,
}

impl RealtimeSttClient {
    pub fn new(api_key: &str, base_url: &str, model: &str, endpointing_ms: u64) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            endpointing_ms,
        }
    }

    fn stream_url(&self, language: &str) -> String {
        format!(
            "{}?model={}&language={}&encoding=linear16&sample_rate={}&channels=1\
             &punctuate=true&interim_results=true&endpointing={}&vad_events=true&smart_format=true",
            self.base_url, self.model, language, SAMPLE_RATE, self.endpointing_ms
        )
    }
}

#[async_trait]
impl SpeechToText for RealtimeSttClient {
    async fn open(&self, language: &str) -> Result<SttSession> {
        let url = self.stream_url(language);
        let mut request = url
            .clone()
            .into_client_request()
            .map_err(|e| TelfioError::Provider {
                message: format!("invalid STT URL {url}: {e}"),
                source: Some(Box::new(e)),
            })?;
        if !self.api_key.is_empty() {
            let token = format!("Token {}", self.api_key);
            request.headers_mut().insert(
                "authorization",
                HeaderValue::from_str(&token)
                    .map_err(|e| TelfioError::Config(format!("invalid STT API key: {e}")))?,
            );
        }

        let (ws, _) = connect_async(request).await.map_err(|e| TelfioError::Provider {
            message: format!("STT connect failed: {e}"),
            source: Some(Box::new(e)),
        })?;
        debug!(language, model = %self.model, "transcription stream opened");

        let (write, read) = ws.split();
        let (audio_tx, audio_rx) = mpsc::channel(256);
        let (event_tx, event_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();

        tokio::spawn(write_loop(write, audio_rx, cancel.clone()));
        tokio::spawn(read_loop(read, event_tx, cancel.clone()));

        Ok(SttSession {
            audio_tx,
            events: event_rx,
            cancel,
        })
    }
}

type WsSink = futures::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;
type WsSource = futures::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

/// Forwards audio frames to the provider; keepalives while idle.
async fn write_loop(
    mut write: WsSink,
    mut audio_rx: mpsc::Receiver<bytes::Bytes>,
    cancel: CancellationToken,
) {
    let mut keepalive = tokio::time::interval(Duration::from_secs(KEEPALIVE_SECS));
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = audio_rx.recv() => match frame {
                Some(pcm) => {
                    keepalive.reset();
                    if write.send(Message::Binary(pcm)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = keepalive.tick() => {
                if write.send(Message::Text(r#"{"type":"KeepAlive"}"#.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    // Best-effort graceful close so the provider finalizes billing.
    let _ = write.send(Message::Text(r#"{"type":"CloseStream"}"#.into())).await;
    let _ = write.send(Message::Close(None)).await;
}

/// Parses provider messages into [`SttEvent`]s and runs the utterance-end
/// watchdog. Silence (empty transcripts) produces no events.
async fn read_loop(mut read: WsSource, events: mpsc::Sender<SttEvent>, cancel: CancellationToken) {
    // Armed after a final; fires a synthesized UtteranceEnd when no interim
    // update arrives within the window.
    let mut utterance_deadline: Option<Instant> = None;

    loop {
        let watchdog = async {
            match utterance_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = watchdog => {
                utterance_deadline = None;
                if events.send(SttEvent::UtteranceEnd).await.is_err() {
                    break;
                }
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ProviderMessage>(text.as_str()) {
                        Ok(ProviderMessage::Results(result)) => {
                            let transcript = result.transcript().trim();
                            if transcript.is_empty() {
                                continue;
                            }
                            let event = if result.is_final {
                                utterance_deadline = Some(
                                    Instant::now() + Duration::from_millis(SYNTH_UTTERANCE_END_MS),
                                );
                                SttEvent::Final {
                                    text: transcript.to_string(),
                                    duration_ms: (result.duration * 1000.0) as u64,
                                }
                            } else {
                                if let Some(ref mut deadline) = utterance_deadline {
                                    *deadline = Instant::now()
                                        + Duration::from_millis(SYNTH_UTTERANCE_END_MS);
                                }
                                SttEvent::Interim {
                                    text: transcript.to_string(),
                                }
                            };
                            if events.send(event).await.is_err() {
                                break;
                            }
                        }
                        Ok(ProviderMessage::UtteranceEnd {}) => {
                            utterance_deadline = None;
                            if events.send(SttEvent::UtteranceEnd).await.is_err() {
                                break;
                            }
                        }
                        Ok(ProviderMessage::SpeechStarted {}) => {
                            if events.send(SttEvent::SpeechStarted).await.is_err() {
                                break;
                            }
                        }
                        Ok(ProviderMessage::Metadata {}) => {}
                        Err(e) => {
                            warn!(error = %e, "unrecognized transcription message");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events
                        .send(SttEvent::Error(format!("transcription stream error: {e}")))
                        .await;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::net::TcpListener;

    async fn spawn_fake_provider(
        script: Vec<&'static str>,
    ) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            // Wait for the first audio frame, then play the script.
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_binary() {
                    for line in &script {
                        ws.send(Message::Text((*line).into())).await.unwrap();
                    }
                    break;
                }
            }
            // Keep the socket open until the client closes.
            while let Some(Ok(msg)) = ws.next().await {
                if matches!(msg, Message::Close(_)) {
                    break;
                }
            }
        });
        addr
    }

    #[test]
    fn stream_url_carries_audio_params() {
        let client = RealtimeSttClient::new("k", "wss://stt.example", "nova-2", 300);
        let url = client.stream_url("pt-BR");
        assert!(url.contains("sample_rate=8000"));
        assert!(url.contains("encoding=linear16"));
        assert!(url.contains("language=pt-BR"));
        assert!(url.contains("interim_results=true"));
    }

    #[tokio::test]
    async fn provider_events_flow_through() {
        let addr = spawn_fake_provider(vec![
            r#"{"type":"Results","channel":{"alternatives":[{"transcript":"oi"}]},"is_final":false}"#,
            r#"{"type":"Results","channel":{"alternatives":[{"transcript":"oi tudo bem"}]},"is_final":true,"duration":2.0}"#,
            r#"{"type":"UtteranceEnd"}"#,
        ])
        .await;

        let client = RealtimeSttClient::new("", &format!("ws://{addr}"), "nova-2", 300);
        let mut session = client.open("pt-BR").await.unwrap();
        session.audio_tx.send(Bytes::from(vec![0u8; 320])).await.unwrap();

        let first = session.events.recv().await.unwrap();
        assert_eq!(first, SttEvent::Interim { text: "oi".into() });

        let second = session.events.recv().await.unwrap();
        assert_eq!(
            second,
            SttEvent::Final { text: "oi tudo bem".into(), duration_ms: 2000 }
        );

        let third = session.events.recv().await.unwrap();
        assert_eq!(third, SttEvent::UtteranceEnd);

        session.cancel.cancel();
    }

    #[tokio::test]
    async fn utterance_end_is_synthesized_after_final() {
        // Provider sends a final but never an UtteranceEnd.
        let addr = spawn_fake_provider(vec![
            r#"{"type":"Results","channel":{"alternatives":[{"transcript":"alô"}]},"is_final":true,"duration":1.0}"#,
        ])
        .await;

        let client = RealtimeSttClient::new("", &format!("ws://{addr}"), "nova-2", 300);
        let mut session = client.open("pt-BR").await.unwrap();
        session.audio_tx.send(Bytes::from(vec![0u8; 320])).await.unwrap();

        let final_event = session.events.recv().await.unwrap();
        assert!(matches!(final_event, SttEvent::Final { .. }));

        let synthesized = tokio::time::timeout(Duration::from_secs(2), session.events.recv())
            .await
            .expect("watchdog should fire within 2s");
        assert_eq!(synthesized, Some(SttEvent::UtteranceEnd));

        session.cancel.cancel();
    }

    #[tokio::test]
    async fn silence_produces_no_events() {
        let addr = spawn_fake_provider(vec![
            r#"{"type":"Results","channel":{"alternatives":[{"transcript":""}]},"is_final":false}"#,
            r#"{"type":"Results","channel":{"alternatives":[{"transcript":"fala"}]},"is_final":false}"#,
        ])
        .await;

        let client = RealtimeSttClient::new("", &format!("ws://{addr}"), "nova-2", 300);
        let mut session = client.open("pt-BR").await.unwrap();
        session.audio_tx.send(Bytes::from(vec![0u8; 320])).await.unwrap();

        // The empty transcript is swallowed; the first event is the speech.
        let event = session.events.recv().await.unwrap();
        assert_eq!(event, SttEvent::Interim { text: "fala".into() });

        session.cancel.cancel();
    }
}
