// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-wide index of live sessions and admission control.
//!
//! Admissions are serialized behind one mutex so the concurrency caps are
//! race-free; lookups and observability snapshots read the DashMap without
//! locking admissions out.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{info, warn};

use telfio_core::types::{CallState, Direction, SessionSnapshot};
use telfio_core::{Result, TelfioError};

use crate::session::SessionCommand;

/// Registry-facing handle to one live session.
#[derive(Clone)]
pub struct SessionHandle {
    pub call_id: String,
    pub direction: Direction,
    pub campaign_id: Option<i64>,
    pub caller_number: Option<String>,
    pub called_number: Option<String>,
    pub started_at: String,
    pub commands: mpsc::Sender<SessionCommand>,
    pub state: watch::Receiver<CallState>,
}

/// Caps applied at admission time.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionLimits {
    pub max_concurrent_calls: usize,
    /// The initiating campaign's own cap, when dialing for a campaign.
    pub campaign_max_concurrent: Option<i64>,
}

/// Keyed mapping `call_id -> session` with serialized admission.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionHandle>,
    admission: Mutex<()>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Admits a session under the global and campaign caps.
    ///
    /// First-come, first-served: the winner of the admission mutex counts
    /// the registry before inserting. A duplicate `call_id` is a state
    /// conflict and leaves the original session untouched.
    pub async fn admit(&self, handle: SessionHandle, limits: AdmissionLimits) -> Result<()> {
        let _guard = self.admission.lock().await;

        if self.sessions.contains_key(&handle.call_id) {
            return Err(TelfioError::Conflict(format!(
                "call {} already exists",
                handle.call_id
            )));
        }

        let active = self.sessions.len();
        if active >= limits.max_concurrent_calls {
            return Err(TelfioError::AdmissionDenied(format!(
                "global cap reached ({active}/{})",
                limits.max_concurrent_calls
            )));
        }

        if let (Some(campaign_id), Some(cap)) = (handle.campaign_id, limits.campaign_max_concurrent)
        {
            let in_campaign = self
                .sessions
                .iter()
                .filter(|entry| entry.value().campaign_id == Some(campaign_id))
                .count() as i64;
            if in_campaign >= cap {
                return Err(TelfioError::AdmissionDenied(format!(
                    "campaign {campaign_id} cap reached ({in_campaign}/{cap})"
                )));
            }
        }

        info!(call_id = %handle.call_id, direction = %handle.direction, "session admitted");
        self.sessions.insert(handle.call_id.clone(), handle);
        Ok(())
    }

    /// Removes a finished session. Called by the session spawner after the
    /// run loop returns.
    pub fn remove(&self, call_id: &str) {
        self.sessions.remove(call_id);
    }

    pub fn get(&self, call_id: &str) -> Option<SessionHandle> {
        self.sessions.get(call_id).map(|entry| entry.value().clone())
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn campaign_count(&self, campaign_id: i64) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().campaign_id == Some(campaign_id))
            .count()
    }

    /// Lock-free observability snapshot.
    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        self.sessions
            .iter()
            .map(|entry| {
                let handle = entry.value();
                SessionSnapshot {
                    call_id: handle.call_id.clone(),
                    state: *handle.state.borrow(),
                    direction: handle.direction,
                    caller_number: handle.caller_number.clone(),
                    called_number: handle.called_number.clone(),
                    campaign_id: handle.campaign_id,
                    started_at: handle.started_at.clone(),
                }
            })
            .collect()
    }

    /// Per-state histogram for dashboards.
    pub fn state_histogram(&self) -> Vec<(CallState, usize)> {
        let mut counts: Vec<(CallState, usize)> = Vec::new();
        for entry in self.sessions.iter() {
            let state = *entry.value().state.borrow();
            match counts.iter_mut().find(|(s, _)| *s == state) {
                Some((_, n)) => *n += 1,
                None => counts.push((state, 1)),
            }
        }
        counts
    }

    /// Sends hangup to every session and waits (bounded) for them to end.
    pub async fn drain(&self, timeout: Duration) {
        let handles: Vec<SessionHandle> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for handle in &handles {
            let _ = handle.commands.send(SessionCommand::Hangup).await;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        while self.active_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(remaining = self.active_count(), "drain timeout, sessions interrupted");
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        info!("all sessions drained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(call_id: &str, campaign_id: Option<i64>) -> SessionHandle {
        let (commands, _rx) = mpsc::channel(4);
        // A watch receiver keeps serving the last value after the sender
        // drops, which is all these tests read.
        let (_state_tx, state) = watch::channel(CallState::Pending);
        SessionHandle {
            call_id: call_id.to_string(),
            direction: Direction::Outbound,
            campaign_id,
            caller_number: None,
            called_number: None,
            started_at: "2026-01-01T00:00:00.000Z".to_string(),
            commands,
            state,
        }
    }

    fn limits(global: usize, campaign: Option<i64>) -> AdmissionLimits {
        AdmissionLimits {
            max_concurrent_calls: global,
            campaign_max_concurrent: campaign,
        }
    }

    #[tokio::test]
    async fn duplicate_call_id_conflicts() {
        let registry = SessionRegistry::new();
        registry.admit(handle("c-1", None), limits(10, None)).await.unwrap();

        let err = registry.admit(handle("c-1", None), limits(10, None)).await;
        assert!(matches!(err, Err(TelfioError::Conflict(_))));
        assert_eq!(registry.active_count(), 1);
    }

    #[tokio::test]
    async fn global_cap_denies_admission() {
        let registry = SessionRegistry::new();
        registry.admit(handle("c-1", None), limits(2, None)).await.unwrap();
        registry.admit(handle("c-2", None), limits(2, None)).await.unwrap();

        let err = registry.admit(handle("c-3", None), limits(2, None)).await;
        assert!(matches!(err, Err(TelfioError::AdmissionDenied(_))));

        registry.remove("c-1");
        registry.admit(handle("c-3", None), limits(2, None)).await.unwrap();
    }

    #[tokio::test]
    async fn campaign_cap_is_independent_of_global() {
        let registry = SessionRegistry::new();
        registry
            .admit(handle("c-1", Some(7)), limits(10, Some(2)))
            .await
            .unwrap();
        registry
            .admit(handle("c-2", Some(7)), limits(10, Some(2)))
            .await
            .unwrap();

        let err = registry
            .admit(handle("c-3", Some(7)), limits(10, Some(2)))
            .await;
        assert!(matches!(err, Err(TelfioError::AdmissionDenied(_))));

        // A different campaign is unaffected.
        registry
            .admit(handle("c-4", Some(8)), limits(10, Some(2)))
            .await
            .unwrap();
        assert_eq!(registry.campaign_count(7), 2);
        assert_eq!(registry.campaign_count(8), 1);
    }

    #[tokio::test]
    async fn snapshot_reflects_sessions() {
        let registry = SessionRegistry::new();
        registry.admit(handle("c-1", None), limits(10, None)).await.unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].call_id, "c-1");
        assert_eq!(snapshot[0].state, CallState::Pending);

        let histogram = registry.state_histogram();
        assert_eq!(histogram, vec![(CallState::Pending, 1)]);
    }
}
