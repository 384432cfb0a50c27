// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Schedule runner: fires one-off scheduled calls at their appointed time.
//!
//! A single loop polls for due `pending` rows every few seconds, claims
//! each with a conditional pending → executing transition, originates, and
//! marks the schedule from the call's terminal event. Cancellation is a
//! storage-level conditional update, so a cancelled row can never fire.

use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use telfio_core::events::{EventKind, LifecycleEvent};
use telfio_core::traits::CallStore;
use telfio_core::types::TerminalStatus;

use crate::dialer::Dialer;

/// Default poll cadence. A due schedule fires within one interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound waiting for a scheduled call to end.
const CALL_WAIT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Drives due scheduled calls through the dialer.
pub struct ScheduleRunner {
    store: Arc<dyn CallStore>,
    dialer: Arc<Dialer>,
    bus: broadcast::Sender<LifecycleEvent>,
    poll_interval: Duration,
}

impl ScheduleRunner {
    pub fn new(
        store: Arc<dyn CallStore>,
        dialer: Arc<Dialer>,
        bus: broadcast::Sender<LifecycleEvent>,
    ) -> Arc<Self> {
        Self::with_poll_interval(store, dialer, bus, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(
        store: Arc<dyn CallStore>,
        dialer: Arc<Dialer>,
        bus: broadcast::Sender<LifecycleEvent>,
        poll_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            dialer,
            bus,
            poll_interval,
        })
    }

    /// Spawns the polling loop; it stops when the token is cancelled.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let runner = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(runner.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!("schedule runner started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("schedule runner stopped");
                        return;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = runner.process_due().await {
                            warn!(error = %e, "schedule pass failed");
                        }
                    }
                }
            }
        })
    }

    /// One polling pass: fire everything due.
    pub async fn process_due(self: &Arc<Self>) -> telfio_core::Result<()> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let due = self.store.due_scheduled_calls(&now).await?;

        for row in due {
            // Single-winner claim; a concurrent cancel or a second runner
            // loses here.
            if !self.store.mark_schedule_executing(row.id).await? {
                continue;
            }

            let events = self.bus.subscribe();
            match self.dialer.dial(&row.phone_number, row.prompt_id, None).await {
                Ok(call_id) => {
                    self.store.bind_schedule_call(row.id, &call_id).await?;
                    info!(schedule_id = row.id, call_id = %call_id, "scheduled call fired");
                    let runner = self.clone();
                    tokio::spawn(async move {
                        runner.watch_schedule(row.id, call_id, events).await;
                    });
                }
                Err(e) => {
                    warn!(schedule_id = row.id, error = %e, "scheduled call failed to fire");
                    self.store.finish_schedule(row.id, TerminalStatus::Failed).await?;
                }
            }
        }
        Ok(())
    }

    async fn watch_schedule(
        &self,
        schedule_id: i64,
        call_id: String,
        mut events: broadcast::Receiver<LifecycleEvent>,
    ) {
        let deadline = tokio::time::Instant::now() + CALL_WAIT_TIMEOUT;
        let status = loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = tokio::time::sleep_until(deadline) => break TerminalStatus::Failed,
            };
            match event {
                Ok(event)
                    if event.kind == EventKind::CallEnded
                        && event.call_id.as_deref() == Some(call_id.as_str()) =>
                {
                    break match event.ended_outcome() {
                        Some(outcome) if outcome.status == TerminalStatus::Completed => {
                            TerminalStatus::Completed
                        }
                        _ => TerminalStatus::Failed,
                    };
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break TerminalStatus::Failed,
            }
        };

        if let Err(e) = self.store.finish_schedule(schedule_id, status).await {
            warn!(schedule_id, error = %e, "schedule update failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telfio_config::{RuntimeSettings, TelfioConfig};
    use telfio_core::TelfioError;
    use telfio_core::traits::NewScheduledCall;
    use telfio_session::{GreetingCache, SessionRegistry, SessionTimings};
    use telfio_test_utils::{MemoryStore, MockLlm, MockStt, MockSwitch, MockTts};

    use crate::dialer::SessionFactory;

    fn runner_with(
        store: Arc<MemoryStore>,
        switch: Arc<MockSwitch>,
    ) -> Arc<ScheduleRunner> {
        let registry = SessionRegistry::new();
        let (bus, _) = broadcast::channel(256);
        let factory = SessionFactory {
            stt: MockStt::new(),
            llm: MockLlm::with_responses(vec![]),
            tts: MockTts::new(),
            store: store.clone(),
            bus: bus.clone(),
            greetings: Arc::new(GreetingCache::new()),
            timings: SessionTimings {
                connect_timeout: Duration::from_millis(100),
                ..SessionTimings::default()
            },
            settings: RuntimeSettings::new(TelfioConfig::default()),
        };
        let dialer = Dialer::new(switch, registry, store.clone(), factory);
        ScheduleRunner::with_poll_interval(store, dialer, bus, Duration::from_millis(50))
    }

    fn schedule_at(time: &str) -> NewScheduledCall {
        NewScheduledCall {
            phone_number: "11988887777".to_string(),
            prompt_id: None,
            scheduled_time: time.to_string(),
            notes: None,
        }
    }

    #[tokio::test]
    async fn due_schedule_fires_and_binds_call() {
        let store = MemoryStore::new();
        let switch = MockSwitch::new();
        let runner = runner_with(store.clone(), switch.clone());

        let row = store
            .create_scheduled_call(&schedule_at("2026-01-01T00:00:00.000Z"))
            .await
            .unwrap();

        runner.process_due().await.unwrap();

        let fired = store.get_scheduled_call(row.id).await.unwrap().unwrap();
        assert_eq!(fired.status, "executing");
        assert!(fired.call_id.is_some());
        assert_eq!(switch.originated_call_ids().await.len(), 1);
    }

    #[tokio::test]
    async fn future_schedule_does_not_fire() {
        let store = MemoryStore::new();
        let switch = MockSwitch::new();
        let runner = runner_with(store.clone(), switch.clone());

        store
            .create_scheduled_call(&schedule_at("2099-01-01T00:00:00.000Z"))
            .await
            .unwrap();

        runner.process_due().await.unwrap();
        assert!(switch.originated_call_ids().await.is_empty());
    }

    #[tokio::test]
    async fn cancelled_schedule_never_fires() {
        let store = MemoryStore::new();
        let switch = MockSwitch::new();
        let runner = runner_with(store.clone(), switch.clone());

        let row = store
            .create_scheduled_call(&schedule_at("2026-01-01T00:00:00.000Z"))
            .await
            .unwrap();
        store.cancel_scheduled_call(row.id).await.unwrap();

        runner.process_due().await.unwrap();

        let cancelled = store.get_scheduled_call(row.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, "cancelled");
        assert!(switch.originated_call_ids().await.is_empty());

        // Cancelling again is a conflict, not a double cancel.
        let err = store.cancel_scheduled_call(row.id).await;
        assert!(matches!(err, Err(TelfioError::Conflict(_))));
    }

    #[tokio::test]
    async fn rejected_origination_fails_schedule() {
        let store = MemoryStore::new();
        let switch = MockSwitch::new();
        switch.reject_number("11988887777").await;
        let runner = runner_with(store.clone(), switch.clone());

        let row = store
            .create_scheduled_call(&schedule_at("2026-01-01T00:00:00.000Z"))
            .await
            .unwrap();

        runner.process_due().await.unwrap();

        let failed = store.get_scheduled_call(row.id).await.unwrap().unwrap();
        assert_eq!(failed.status, "failed");
    }

    #[tokio::test]
    async fn connect_failure_marks_schedule_failed() {
        let store = MemoryStore::new();
        let switch = MockSwitch::new();
        let runner = runner_with(store.clone(), switch.clone());

        let row = store
            .create_scheduled_call(&schedule_at("2026-01-01T00:00:00.000Z"))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let handle = runner.spawn(cancel.clone());

        // The switch accepts the origination but never connects media; the
        // session fails on connect timeout and the schedule follows.
        for _ in 0..100 {
            let current = store.get_scheduled_call(row.id).await.unwrap().unwrap();
            if current.status == "failed" {
                cancel.cancel();
                handle.await.unwrap();
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("schedule never reached a terminal status");
    }
}
