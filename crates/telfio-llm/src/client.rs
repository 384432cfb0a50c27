// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for OpenAI-compatible streaming chat completions.
//!
//! Provides [`ChatClient`] which handles request construction,
//! authentication, streaming SSE responses, transient error retry, and
//! prompt cancellation mid-stream.

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use telfio_core::traits::{ChatRequest, LanguageModel, LlmEvent, LlmStream};
use telfio_core::{Result, TelfioError};

use crate::types::{ApiErrorResponse, CompletionRequest, StreamChunk};

/// HTTP client for a chat completions endpoint.
///
/// Manages authentication headers, connection pooling, and retry logic
/// for transient errors (429, 500, 503).
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    max_tokens: u32,
    max_retries: u32,
}

impl ChatClient {
    /// Creates a new chat client.
    ///
    /// `base_url` is the API root (e.g. `https://api.openai.com/v1`);
    /// the client appends `/chat/completions`.
    pub fn new(api_key: &str, base_url: &str, max_tokens: u32) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let bearer = format!("Bearer {api_key}");
        headers.insert(
            "authorization",
            HeaderValue::from_str(&bearer)
                .map_err(|e| TelfioError::Config(format!("invalid LLM API key: {e}")))?,
        );
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| TelfioError::Provider {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_tokens,
            max_retries: 1,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Sends the request, retrying once on transient errors, and returns
    /// the streaming response.
    async fn open_stream(&self, request: &CompletionRequest) -> Result<reqwest::Response> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                warn!(attempt, "retrying completion request after transient error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }

            let response = self
                .client
                .post(self.completions_url())
                .json(request)
                .send()
                .await
                .map_err(|e| TelfioError::Provider {
                    message: format!("HTTP request failed: {e}"),
                    source: Some(Box::new(e)),
                })?;

            let status = response.status();
            debug!(status = %status, attempt, "completion response received");

            if status.is_success() {
                return Ok(response);
            }

            let body = response.text().await.unwrap_or_default();
            let error_msg = if let Ok(api_err) = serde_json::from_str::<ApiErrorResponse>(&body) {
                format!(
                    "LLM API error ({}): {}",
                    api_err.error.type_.as_deref().unwrap_or("unknown"),
                    api_err.error.message
                )
            } else {
                format!("API returned {status}: {body}")
            };

            if is_transient_error(status) && attempt < self.max_retries {
                warn!(status = %status, "transient error, will retry");
                last_error = Some(TelfioError::Provider {
                    message: error_msg,
                    source: None,
                });
                continue;
            }

            return Err(TelfioError::Provider {
                message: error_msg,
                source: None,
            });
        }

        Err(last_error.unwrap_or_else(|| TelfioError::Provider {
            message: "completion request failed after retries".into(),
            source: None,
        }))
    }
}

#[async_trait]
impl LanguageModel for ChatClient {
    async fn stream_chat(&self, request: ChatRequest) -> Result<LlmStream> {
        let api_request = CompletionRequest {
            model: request.model,
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: self.max_tokens,
            stream: true,
        };

        let response = self.open_stream(&api_request).await?;

        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        tokio::spawn(pump_stream(response, tx, cancel.clone()));

        Ok(LlmStream { events: rx, cancel })
    }
}

/// Forwards SSE chunks as [`LlmEvent`]s until `[DONE]`, error, or cancel.
///
/// Cancellation drops the response stream, which aborts the underlying
/// transfer and stops upstream token generation promptly.
async fn pump_stream(
    response: reqwest::Response,
    tx: mpsc::Sender<LlmEvent>,
    cancel: CancellationToken,
) {
    let mut stream = response.bytes_stream().eventsource();
    let mut full_text = String::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("completion stream cancelled");
                return;
            }
            item = stream.next() => match item {
                Some(Ok(event)) => {
                    if event.data.trim() == "[DONE]" {
                        let _ = tx.send(LlmEvent::Done { full_text }).await;
                        return;
                    }
                    match serde_json::from_str::<StreamChunk>(&event.data) {
                        Ok(chunk) => {
                            let delta = chunk
                                .choices
                                .first()
                                .and_then(|c| c.delta.content.clone());
                            if let Some(text) = delta
                                && !text.is_empty()
                            {
                                full_text.push_str(&text);
                                if tx.send(LlmEvent::Delta(text)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "skipping malformed stream chunk");
                        }
                    }
                }
                Some(Err(e)) => {
                    let _ = tx.send(LlmEvent::Error(format!("SSE stream error: {e}"))).await;
                    return;
                }
                None => {
                    // Stream ended without [DONE]; treat accumulated text as final.
                    let _ = tx.send(LlmEvent::Done { full_text }).await;
                    return;
                }
            }
        }
    }
}

/// Returns true for HTTP status codes that indicate transient errors worth retrying.
fn is_transient_error(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 503)
}

#[cfg(test)]
mod tests {
    use super::*;
    use telfio_core::traits::ChatMessage;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_request() -> ChatRequest {
        ChatRequest {
            model: "gpt-4.1-nano".into(),
            temperature: 0.7,
            messages: vec![
                ChatMessage::system("Seja breve."),
                ChatMessage::user("oi tudo bem"),
            ],
        }
    }

    fn sse_body(lines: &[&str]) -> String {
        let mut body = String::new();
        for line in lines {
            body.push_str("data: ");
            body.push_str(line);
            body.push_str("\n\n");
        }
        body
    }

    async fn mount_sse(server: &MockServer, body: String) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn streams_deltas_then_done() {
        let server = MockServer::start().await;
        mount_sse(
            &server,
            sse_body(&[
                r#"{"choices":[{"index":0,"delta":{"content":"Tudo "}}]}"#,
                r#"{"choices":[{"index":0,"delta":{"content":"bem!"}}]}"#,
                r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
                "[DONE]",
            ]),
        )
        .await;

        let client = ChatClient::new("test-key", &server.uri(), 500).unwrap();
        let mut stream = client.stream_chat(test_request()).await.unwrap();

        let mut deltas = Vec::new();
        let mut done_text = None;
        while let Some(event) = stream.events.recv().await {
            match event {
                LlmEvent::Delta(text) => deltas.push(text),
                LlmEvent::Done { full_text } => {
                    done_text = Some(full_text);
                    break;
                }
                LlmEvent::Error(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(deltas, vec!["Tudo ", "bem!"]);
        assert_eq!(done_text.as_deref(), Some("Tudo bem!"));
    }

    #[tokio::test]
    async fn cancel_stops_stream() {
        let server = MockServer::start().await;
        // A long stream with no [DONE]; cancellation must end it.
        mount_sse(
            &server,
            sse_body(&[r#"{"choices":[{"index":0,"delta":{"content":"a"}}]}"#]),
        )
        .await;

        let client = ChatClient::new("test-key", &server.uri(), 500).unwrap();
        let mut stream = client.stream_chat(test_request()).await.unwrap();

        // Consume the first delta, then cancel.
        let first = stream.events.recv().await;
        assert!(matches!(first, Some(LlmEvent::Delta(_)) | Some(LlmEvent::Done { .. })));
        stream.cancel.cancel();
        stream.cancel.cancel(); // idempotent

        // The channel must close (pump task returned) or yield Done.
        let rest = tokio::time::timeout(Duration::from_secs(1), async {
            while stream.events.recv().await.is_some() {}
        })
        .await;
        assert!(rest.is_ok(), "stream did not terminate after cancel");
    }

    #[tokio::test]
    async fn retries_once_on_429() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": {"message": "Rate limited", "type": "rate_limit_error"}
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body(&[
                        r#"{"choices":[{"index":0,"delta":{"content":"ok"}}]}"#,
                        "[DONE]",
                    ])),
            )
            .mount(&server)
            .await;

        let client = ChatClient::new("test-key", &server.uri(), 500).unwrap();
        let mut stream = client.stream_chat(test_request()).await.unwrap();
        let mut saw_done = false;
        while let Some(event) = stream.events.recv().await {
            if matches!(event, LlmEvent::Done { .. }) {
                saw_done = true;
            }
        }
        assert!(saw_done);
    }

    #[tokio::test]
    async fn non_transient_error_propagates() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"message": "Bad model", "type": "invalid_request_error"}
            })))
            .mount(&server)
            .await;

        let client = ChatClient::new("test-key", &server.uri(), 500).unwrap();
        let result = client.stream_chat(test_request()).await;
        assert!(result.is_err());
        let err = result.err().map(|e| e.to_string()).unwrap_or_default();
        assert!(err.contains("invalid_request_error"), "got: {err}");
    }
}
