// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Campaign runner: one cooperative pacing loop per running campaign.
//!
//! Each iteration claims up to `max_concurrent − calling` pending contacts,
//! originates them, and binds the resulting call ids. Contact outcomes are
//! driven by `call.ended` events from the bus: completed when the session
//! reached LISTENING and the switch disconnected normally, otherwise failed
//! with up to two connect-failure retries spaced a minute apart.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use telfio_core::events::{EventKind, LifecycleEvent};
use telfio_core::traits::{CallStore, ContactRow};
use telfio_core::types::TerminalStatus;
use telfio_core::{Result, TelfioError};

use crate::dialer::Dialer;

/// Total origination attempts per contact (first try + two retries).
pub const MAX_CONTACT_ATTEMPTS: i64 = 3;
/// Spacing between connect-failure retries.
pub const RETRY_SPACING_SECS: i64 = 60;
/// Pacing loop cadence.
const LOOP_INTERVAL: Duration = Duration::from_secs(1);
/// Upper bound waiting for a dialed call to end.
const CALL_WAIT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Supervises the pacing loops of running campaigns.
pub struct CampaignRunner {
    store: Arc<dyn CallStore>,
    dialer: Arc<Dialer>,
    bus: broadcast::Sender<LifecycleEvent>,
    active: DashMap<i64, CancellationToken>,
}

impl CampaignRunner {
    pub fn new(
        store: Arc<dyn CallStore>,
        dialer: Arc<Dialer>,
        bus: broadcast::Sender<LifecycleEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            dialer,
            bus,
            active: DashMap::new(),
        })
    }

    pub fn is_running(&self, campaign_id: i64) -> bool {
        self.active.contains_key(&campaign_id)
    }

    /// Starts or resumes a campaign. Conflicts unless it is pending/paused.
    pub async fn start(self: &Arc<Self>, campaign_id: i64) -> Result<()> {
        if self.is_running(campaign_id) {
            return Err(TelfioError::Conflict(format!(
                "campaign {campaign_id} is already running"
            )));
        }
        let campaign = self
            .store
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| TelfioError::NotFound(format!("campaign {campaign_id}")))?;
        if campaign.status != "pending" && campaign.status != "paused" {
            return Err(TelfioError::Conflict(format!(
                "campaign {campaign_id} is {}, cannot start",
                campaign.status
            )));
        }

        self.store.set_campaign_status(campaign_id, "running").await?;

        let token = CancellationToken::new();
        self.active.insert(campaign_id, token.clone());
        let runner = self.clone();
        tokio::spawn(async move {
            runner.run_loop(campaign_id, token).await;
            runner.active.remove(&campaign_id);
        });

        info!(campaign_id, "campaign started");
        Ok(())
    }

    /// Cooperative pause: the loop stops claiming; in-flight calls finish.
    pub async fn pause(&self, campaign_id: i64) -> Result<()> {
        let campaign = self
            .store
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| TelfioError::NotFound(format!("campaign {campaign_id}")))?;
        if campaign.status != "running" {
            return Err(TelfioError::Conflict(format!(
                "campaign {campaign_id} is {}, cannot pause",
                campaign.status
            )));
        }

        if let Some((_, token)) = self.active.remove(&campaign_id) {
            token.cancel();
        }
        self.store.set_campaign_status(campaign_id, "paused").await?;
        info!(campaign_id, "campaign paused");
        Ok(())
    }

    async fn run_loop(self: &Arc<Self>, campaign_id: i64, token: CancellationToken) {
        let mut interval = tokio::time::interval(LOOP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!(campaign_id, "campaign loop stopped");
                    return;
                }
                _ = interval.tick() => {}
            }

            let campaign = match self.store.get_campaign(campaign_id).await {
                Ok(Some(campaign)) if campaign.status == "running" => campaign,
                Ok(_) => {
                    info!(campaign_id, "campaign no longer running");
                    return;
                }
                Err(e) => {
                    warn!(campaign_id, error = %e, "campaign read failed");
                    continue;
                }
            };

            let counts = match self.store.campaign_counts(campaign_id).await {
                Ok(counts) => counts,
                Err(e) => {
                    warn!(campaign_id, error = %e, "contact counts failed");
                    continue;
                }
            };

            if counts.pending == 0 && counts.calling == 0 {
                self.complete_campaign(campaign_id).await;
                return;
            }

            let slots = campaign.max_concurrent - counts.calling;
            if slots <= 0 {
                continue;
            }

            let contacts = match self
                .store
                .claim_pending_contacts(campaign_id, slots, RETRY_SPACING_SECS)
                .await
            {
                Ok(contacts) => contacts,
                Err(e) => {
                    warn!(campaign_id, error = %e, "contact claim failed");
                    continue;
                }
            };

            for contact in contacts {
                self.dial_contact(&campaign, contact).await;
            }
        }
    }

    async fn dial_contact(
        self: &Arc<Self>,
        campaign: &telfio_core::traits::CampaignRow,
        contact: ContactRow,
    ) {
        // Subscribe before dialing so the terminal event cannot be missed.
        let events = self.bus.subscribe();

        let result = self
            .dialer
            .dial(
                &contact.phone_number,
                campaign.prompt_id,
                Some((campaign.id, campaign.max_concurrent)),
            )
            .await;

        match result {
            Ok(call_id) => {
                if let Err(e) = self.store.bind_contact_call(contact.id, &call_id).await {
                    warn!(contact_id = contact.id, error = %e, "contact bind failed");
                }
                info!(
                    campaign_id = campaign.id,
                    contact_id = contact.id,
                    call_id = %call_id,
                    "campaign call initiated"
                );
                let runner = self.clone();
                tokio::spawn(async move {
                    runner.watch_contact(contact, call_id, events).await;
                });
            }
            Err(e) => {
                // Origination rejected or admission denied: both count as
                // connect failures for retry purposes.
                self.contact_connect_failed(&contact, &e.to_string()).await;
            }
        }
    }

    /// Waits for the bound call's terminal event and applies the outcome
    /// rule.
    async fn watch_contact(
        &self,
        contact: ContactRow,
        call_id: String,
        mut events: broadcast::Receiver<LifecycleEvent>,
    ) {
        let deadline = tokio::time::Instant::now() + CALL_WAIT_TIMEOUT;
        let outcome = loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(call_id = %call_id, "gave up waiting for call end");
                    break None;
                }
            };
            match event {
                Ok(event)
                    if event.kind == EventKind::CallEnded
                        && event.call_id.as_deref() == Some(call_id.as_str()) =>
                {
                    break event.ended_outcome();
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(call_id = %call_id, skipped, "event bus lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break None,
            }
        };

        match outcome {
            Some(outcome) if outcome.reached_listening && outcome.error.is_none() => {
                if let Err(e) = self
                    .store
                    .finish_contact(contact.id, TerminalStatus::Completed, None)
                    .await
                {
                    warn!(contact_id = contact.id, error = %e, "contact update failed");
                }
                let _ = self.store.refresh_campaign_stats(contact.campaign_id).await;
            }
            Some(outcome) if outcome.connect_failure => {
                let reason = outcome
                    .error
                    .unwrap_or_else(|| "switch never connected".to_string());
                self.contact_connect_failed(&contact, &reason).await;
            }
            Some(outcome) => {
                // Post-answer failure: terminal, no retry.
                let reason = outcome.error.unwrap_or_else(|| "call failed".to_string());
                if let Err(e) = self
                    .store
                    .finish_contact(contact.id, TerminalStatus::Failed, Some(&reason))
                    .await
                {
                    warn!(contact_id = contact.id, error = %e, "contact update failed");
                }
                let _ = self.store.refresh_campaign_stats(contact.campaign_id).await;
            }
            None => {
                self.contact_connect_failed(&contact, "no terminal event").await;
            }
        }
    }

    /// Connect/answer failures retry with spacing until attempts run out.
    async fn contact_connect_failed(&self, contact: &ContactRow, reason: &str) {
        // `attempts` was bumped when the contact was claimed.
        let result = if contact.attempts < MAX_CONTACT_ATTEMPTS {
            info!(
                contact_id = contact.id,
                attempts = contact.attempts,
                reason,
                "contact will retry"
            );
            self.store.requeue_contact(contact.id, reason).await
        } else {
            self.store
                .finish_contact(contact.id, TerminalStatus::Failed, Some(reason))
                .await
        };
        if let Err(e) = result {
            warn!(contact_id = contact.id, error = %e, "contact update failed");
        }
        let _ = self.store.refresh_campaign_stats(contact.campaign_id).await;
    }

    async fn complete_campaign(&self, campaign_id: i64) {
        if let Err(e) = self.store.set_campaign_status(campaign_id, "completed").await {
            warn!(campaign_id, error = %e, "campaign completion update failed");
            return;
        }
        let _ = self.store.refresh_campaign_stats(campaign_id).await;

        let campaign = self.store.get_campaign(campaign_id).await.ok().flatten();
        let data = match campaign {
            Some(c) => serde_json::json!({
                "campaign_id": c.id,
                "name": c.name,
                "total_contacts": c.total_contacts,
                "completed_contacts": c.completed_contacts,
                "failed_contacts": c.failed_contacts,
            }),
            None => serde_json::json!({ "campaign_id": campaign_id }),
        };
        let _ = self
            .bus
            .send(LifecycleEvent::now(EventKind::CampaignCompleted, None, data));
        info!(campaign_id, "campaign completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telfio_config::{RuntimeSettings, TelfioConfig};
    use telfio_core::traits::{NewCampaign, NewContact};
    use telfio_session::{GreetingCache, SessionRegistry, SessionTimings};
    use telfio_test_utils::{MemoryStore, MockLlm, MockStt, MockSwitch, MockTts};

    use crate::dialer::SessionFactory;

    async fn setup(
        max_concurrent: i64,
        contacts: &[&str],
    ) -> (Arc<CampaignRunner>, Arc<MemoryStore>, Arc<MockSwitch>, i64) {
        let store = MemoryStore::new();
        let switch = MockSwitch::new();
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
                // Campaign tests never attach a switch; calls fail fast as
                // connect failures.
                connect_timeout: Duration::from_millis(100),
                ..SessionTimings::default()
            },
            settings: RuntimeSettings::new(TelfioConfig::default()),
        };
        let dialer = Dialer::new(switch.clone(), registry, store.clone(), factory);
        let runner = CampaignRunner::new(store.clone(), dialer, bus);

        let campaign = store
            .create_campaign(&NewCampaign {
                name: "teste".to_string(),
                description: None,
                prompt_id: None,
                max_concurrent,
            })
            .await
            .unwrap();
        let rows: Vec<NewContact> = contacts
            .iter()
            .map(|p| NewContact {
                phone_number: p.to_string(),
                name: None,
                extra_data: None,
            })
            .collect();
        store.add_contacts(campaign.id, &rows).await.unwrap();

        (runner, store, switch, campaign.id)
    }

    #[tokio::test]
    async fn start_requires_startable_status() {
        let (runner, store, _switch, id) = setup(2, &[]).await;
        store.set_campaign_status(id, "completed").await.unwrap();

        let err = runner.start(id).await;
        assert!(matches!(err, Err(TelfioError::Conflict(_))));
    }

    #[tokio::test]
    async fn pause_requires_running() {
        let (runner, _store, _switch, id) = setup(2, &["11999990000"]).await;
        let err = runner.pause(id).await;
        assert!(matches!(err, Err(TelfioError::Conflict(_))));
    }

    #[tokio::test]
    async fn cap_bounds_simultaneous_calling_contacts() {
        let phones = [
            "11999990001",
            "11999990002",
            "11999990003",
            "11999990004",
            "11999990005",
        ];
        let (runner, store, _switch, id) = setup(2, &phones).await;
        runner.start(id).await.unwrap();

        // While the campaign churns, calling never exceeds the cap.
        for _ in 0..30 {
            let counts = store.campaign_counts(id).await.unwrap();
            assert!(
                counts.calling <= 2,
                "calling {} exceeded max_concurrent",
                counts.calling
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        runner.pause(id).await.ok();
    }

    #[tokio::test]
    async fn rejected_contacts_exhaust_attempts_then_fail() {
        let (runner, store, switch, id) = setup(1, &["11999990009"]).await;
        // Every origination for this number is rejected.
        switch.reject_number("11999990009").await;
        runner.start(id).await.unwrap();

        // With 60s retry spacing only the first attempt lands quickly; the
        // contact must be back in pending with one attempt recorded.
        tokio::time::sleep(Duration::from_millis(500)).await;
        let contacts = store.list_contacts(id).await.unwrap();
        assert_eq!(contacts[0].attempts, 1);
        assert_eq!(contacts[0].status, "pending");
        assert!(contacts[0].error_message.is_some());

        runner.pause(id).await.ok();
    }

    #[tokio::test]
    async fn empty_campaign_completes() {
        let (runner, store, _switch, id) = setup(2, &[]).await;
        runner.start(id).await.unwrap();

        for _ in 0..100 {
            let campaign = store.get_campaign(id).await.unwrap().unwrap();
            if campaign.status == "completed" {
                assert!(campaign.completed_at.is_some());
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("campaign never completed");
    }
}
