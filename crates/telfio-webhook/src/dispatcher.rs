// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queue-backed webhook delivery.
//!
//! Each lifecycle event fans out to one job per matching active config.
//! Jobs for the same config flow through one FIFO worker (per-webhook
//! ordering); workers for different configs run in parallel. Failed
//! deliveries retry on 5xx/network errors with fixed backoff; 4xx is
//! terminal. Every attempt is logged.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use telfio_core::events::LifecycleEvent;
use telfio_core::traits::{CallStore, NewWebhookLog, WebhookConfigRow};
use telfio_core::{Result, TelfioError};

use crate::signature::{EVENT_HEADER, SIGNATURE_HEADER, sign_body};

/// Response bodies are truncated to this length in delivery logs.
const LOGGED_RESPONSE_LIMIT: usize = 1000;

/// Retry ladder for failed deliveries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before attempt N+1 is `delays[N-1]` (clamped to the last).
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delays: vec![Duration::from_secs(1), Duration::from_secs(5)],
        }
    }
}

impl RetryPolicy {
    fn delay_after(&self, attempt: u32) -> Duration {
        let idx = (attempt as usize).saturating_sub(1);
        self.delays
            .get(idx)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::from_secs(1))
    }
}

struct DeliveryJob {
    config: WebhookConfigRow,
    event_name: String,
    body: String,
}

/// Dispatches lifecycle events to configured webhook endpoints.
pub struct WebhookDispatcher {
    store: Arc<dyn CallStore>,
    client: reqwest::Client,
    policy: RetryPolicy,
    workers: DashMap<i64, mpsc::Sender<DeliveryJob>>,
}

impl WebhookDispatcher {
    pub fn new(store: Arc<dyn CallStore>) -> Arc<Self> {
        Self::with_policy(store, RetryPolicy::default())
    }

    pub fn with_policy(store: Arc<dyn CallStore>, policy: RetryPolicy) -> Arc<Self> {
        Arc::new(Self {
            store,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            policy,
            workers: DashMap::new(),
        })
    }

    /// Consumes the lifecycle bus until cancelled.
    pub fn spawn(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<LifecycleEvent>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            info!("webhook dispatcher started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("webhook dispatcher stopped");
                        return;
                    }
                    event = events.recv() => match event {
                        Ok(event) => {
                            if let Err(e) = dispatcher.dispatch(&event).await {
                                warn!(error = %e, "event dispatch failed");
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "webhook dispatcher lagged behind the bus");
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        })
    }

    /// Fans one event out to every matching active config.
    pub async fn dispatch(self: &Arc<Self>, event: &LifecycleEvent) -> Result<()> {
        let event_name = event.kind.as_str();
        let configs = self.store.active_webhooks_for(event_name).await?;
        if configs.is_empty() {
            return Ok(());
        }

        let body = serde_json::to_string(&serde_json::json!({
            "event": event_name,
            "timestamp": event.timestamp,
            "data": event.data,
        }))
        .map_err(|e| TelfioError::Internal(format!("webhook body encode failed: {e}")))?;

        for config in configs {
            self.enqueue(DeliveryJob {
                config,
                event_name: event_name.to_string(),
                body: body.clone(),
            })
            .await;
        }
        Ok(())
    }

    /// Routes a job to its config's FIFO worker, spawning it on first use.
    async fn enqueue(self: &Arc<Self>, job: DeliveryJob) {
        let config_id = job.config.id;
        let sender = self
            .workers
            .entry(config_id)
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel::<DeliveryJob>(256);
                let dispatcher = self.clone();
                tokio::spawn(async move {
                    dispatcher.worker_loop(rx).await;
                });
                tx
            })
            .clone();

        if sender.send(job).await.is_err() {
            // Worker died; drop its registration so the next event respawns it.
            self.workers.remove(&config_id);
            warn!(config_id, "webhook worker gone, delivery dropped");
        }
    }

    async fn worker_loop(self: Arc<Self>, mut jobs: mpsc::Receiver<DeliveryJob>) {
        while let Some(job) = jobs.recv().await {
            self.deliver_with_retries(job).await;
        }
    }

    async fn deliver_with_retries(&self, job: DeliveryJob) {
        for attempt in 1..=self.policy.max_attempts {
            match self.attempt_delivery(&job, attempt as i64).await {
                DeliveryResult::Delivered => {
                    debug!(url = %job.config.url, event = %job.event_name, attempt, "webhook delivered");
                    return;
                }
                DeliveryResult::Rejected => {
                    // 4xx: the endpoint understood and refused. Terminal.
                    warn!(url = %job.config.url, event = %job.event_name, "webhook rejected");
                    return;
                }
                DeliveryResult::Retryable => {
                    if attempt < self.policy.max_attempts {
                        tokio::time::sleep(self.policy.delay_after(attempt)).await;
                    }
                }
            }
        }
        warn!(
            url = %job.config.url,
            event = %job.event_name,
            attempts = self.policy.max_attempts,
            "webhook delivery gave up"
        );
    }

    async fn attempt_delivery(&self, job: &DeliveryJob, attempt: i64) -> DeliveryResult {
        let mut request = self
            .client
            .post(&job.config.url)
            .header("content-type", "application/json")
            .header(EVENT_HEADER, &job.event_name);
        if let Some(secret) = &job.config.secret {
            request = request.header(SIGNATURE_HEADER, sign_body(secret, &job.body));
        }

        let (result, status_code, response_body, error_message) =
            match request.body(job.body.clone()).send().await {
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    let truncated: String = body.chars().take(LOGGED_RESPONSE_LIMIT).collect();
                    let result = if status.is_success() {
                        DeliveryResult::Delivered
                    } else if status.is_client_error() {
                        DeliveryResult::Rejected
                    } else {
                        DeliveryResult::Retryable
                    };
                    (result, Some(status.as_u16() as i64), Some(truncated), None)
                }
                Err(e) => (
                    DeliveryResult::Retryable,
                    None,
                    None,
                    Some(e.to_string()),
                ),
            };

        let log = NewWebhookLog {
            config_id: job.config.id,
            event_type: job.event_name.clone(),
            payload: job.body.clone(),
            status_code,
            response_body,
            attempt,
            success: matches!(result, DeliveryResult::Delivered),
            error_message,
        };
        if let Err(e) = self.store.log_webhook_delivery(&log).await {
            warn!(config_id = job.config.id, error = %e, "delivery log failed");
        }

        result
    }

    /// Sends a synthetic test event to one config, bypassing the queue.
    pub async fn send_test(self: &Arc<Self>, config_id: i64) -> Result<serde_json::Value> {
        let config = self
            .store
            .get_webhook(config_id)
            .await?
            .ok_or_else(|| TelfioError::NotFound(format!("webhook {config_id}")))?;

        let body = serde_json::to_string(&serde_json::json!({
            "event": "test",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "data": { "webhook_id": config_id },
        }))
        .map_err(|e| TelfioError::Internal(format!("webhook body encode failed: {e}")))?;

        let mut request = self
            .client
            .post(&config.url)
            .header("content-type", "application/json")
            .header(EVENT_HEADER, "test");
        if let Some(secret) = &config.secret {
            request = request.header(SIGNATURE_HEADER, sign_body(secret, &body));
        }

        match request.body(body).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                Ok(serde_json::json!({
                    "success": (200..300).contains(&status),
                    "status_code": status,
                }))
            }
            Err(e) => Ok(serde_json::json!({
                "success": false,
                "message": e.to_string(),
            })),
        }
    }
}

enum DeliveryResult {
    Delivered,
    Rejected,
    Retryable,
}
