// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound call origination.
//!
//! The dialer admits a pending session under the concurrency caps, records
//! the call, and asks the switch to originate; the switch's answer handler
//! connects the media stream to `/ws/{call_id}`, which binds to the
//! pending session.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use tokio::sync::broadcast;
use tracing::{info, warn};

use telfio_config::RuntimeSettings;
use telfio_core::events::LifecycleEvent;
use telfio_core::traits::{CallStore, LanguageModel, NewCall, PromptRow, SpeechToText, TextToSpeech};
use telfio_core::types::{Direction, PromptSnapshot};
use telfio_core::{Result, SwitchControl, TelfioError};
use telfio_session::{
    AdmissionLimits, CallSession, GreetingCache, SessionCommand, SessionContext, SessionHandle,
    SessionRegistry, SessionTimings,
};

/// System prompt used when no prompt row is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "Você é um assistente virtual de atendimento telefônico. \
Responda sempre em uma ou duas frases curtas, de forma natural e direta. \
Se não entender, peça educadamente para a pessoa repetir.";

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Builds sessions with a shared provider/context template.
#[derive(Clone)]
pub struct SessionFactory {
    pub stt: Arc<dyn SpeechToText>,
    pub llm: Arc<dyn LanguageModel>,
    pub tts: Arc<dyn TextToSpeech>,
    pub store: Arc<dyn CallStore>,
    pub bus: broadcast::Sender<LifecycleEvent>,
    pub greetings: Arc<GreetingCache>,
    pub timings: SessionTimings,
    pub settings: RuntimeSettings,
}

impl SessionFactory {
    fn context(&self) -> SessionContext {
        SessionContext {
            stt: self.stt.clone(),
            llm: self.llm.clone(),
            tts: self.tts.clone(),
            store: self.store.clone(),
            bus: self.bus.clone(),
            greetings: self.greetings.clone(),
            language: self.settings.current().language.clone(),
        }
    }

    /// Captures a prompt snapshot: the row when given, otherwise defaults
    /// from the live settings view.
    pub fn snapshot(&self, prompt: Option<&PromptRow>) -> PromptSnapshot {
        let settings = self.settings.current();
        match prompt {
            Some(row) => PromptSnapshot {
                prompt_id: Some(row.id),
                system_prompt: row.system_prompt.clone(),
                voice_id: row.voice_id.clone(),
                llm_model: row.llm_model.clone(),
                temperature: row.temperature,
                greeting_text: row.greeting_text.clone(),
                greeting_duration_ms: row.greeting_duration_ms,
            },
            None => PromptSnapshot {
                prompt_id: None,
                system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
                voice_id: settings.default_voice_id.clone(),
                llm_model: settings.default_llm_model.clone(),
                temperature: 0.7,
                greeting_text: None,
                greeting_duration_ms: None,
            },
        }
    }

    /// Creates a session plus its registry handle, both in `PENDING`.
    pub fn create(
        &self,
        call_id: &str,
        direction: Direction,
        prompt: PromptSnapshot,
        campaign_id: Option<i64>,
        called_number: Option<String>,
    ) -> (CallSession, SessionHandle) {
        // The barge-in threshold is a live tunable; everything else in the
        // timing ladder is fixed at boot.
        let mut timings = self.timings.clone();
        timings.barge_in_min_chars = self.settings.current().barge_in_min_chars;
        let (session, commands, state) = CallSession::new(
            call_id.to_string(),
            direction,
            prompt,
            self.context(),
            timings,
        );
        let handle = SessionHandle {
            call_id: call_id.to_string(),
            direction,
            campaign_id,
            caller_number: None,
            called_number,
            started_at: now_iso(),
            commands,
            state,
        };
        (session, handle)
    }
}

/// Issues outbound originations and hangups.
pub struct Dialer {
    switch: Arc<dyn SwitchControl>,
    registry: Arc<SessionRegistry>,
    store: Arc<dyn CallStore>,
    factory: SessionFactory,
}

impl Dialer {
    pub fn new(
        switch: Arc<dyn SwitchControl>,
        registry: Arc<SessionRegistry>,
        store: Arc<dyn CallStore>,
        factory: SessionFactory,
    ) -> Arc<Self> {
        Arc::new(Self {
            switch,
            registry,
            store,
            factory,
        })
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn factory(&self) -> &SessionFactory {
        &self.factory
    }

    /// Places an outbound call. Returns the new `call_id` once the switch
    /// accepted the origination command.
    ///
    /// `campaign` carries `(campaign_id, max_concurrent)` when dialing on
    /// behalf of a campaign; its cap is enforced at admission together
    /// with the global cap.
    pub async fn dial(
        &self,
        number: &str,
        prompt_id: Option<i64>,
        campaign: Option<(i64, i64)>,
    ) -> Result<String> {
        let prompt_row = match prompt_id {
            Some(id) => self.store.get_prompt(id).await?,
            None => self.store.active_prompt().await?,
        };
        if prompt_id.is_some() && prompt_row.is_none() {
            return Err(TelfioError::NotFound(format!(
                "prompt {} does not exist",
                prompt_id.unwrap_or_default()
            )));
        }
        let snapshot = self.factory.snapshot(prompt_row.as_ref());

        let call_id = format!("call-{}", uuid::Uuid::new_v4().simple());
        let (session, handle) = self.factory.create(
            &call_id,
            Direction::Outbound,
            snapshot.clone(),
            campaign.map(|(id, _)| id),
            Some(number.to_string()),
        );

        let limits = AdmissionLimits {
            max_concurrent_calls: self.factory.settings.current().max_concurrent_calls,
            campaign_max_concurrent: campaign.map(|(_, cap)| cap),
        };
        self.registry.admit(handle, limits).await?;

        self.store
            .insert_call(&NewCall {
                call_id: call_id.clone(),
                switch_uuid: None,
                caller_number: None,
                called_number: Some(number.to_string()),
                prompt_id: snapshot.prompt_id,
                direction: Direction::Outbound.to_string(),
                start_time: now_iso(),
            })
            .await?;

        // The session owns its lifecycle from here; the registry entry is
        // removed when the run loop returns.
        let registry = self.registry.clone();
        let spawned_call_id = call_id.clone();
        tokio::spawn(async move {
            let outcome = session.run().await;
            registry.remove(&spawned_call_id);
            info!(call_id = %spawned_call_id, status = %outcome.status, "session finished");
        });

        if let Err(e) = self.switch.originate(number, &call_id).await {
            warn!(call_id, error = %e, "origination rejected, tearing down session");
            if let Some(handle) = self.registry.get(&call_id) {
                let _ = handle.commands.send(SessionCommand::Hangup).await;
            }
            return Err(e);
        }

        info!(call_id, number, "origination accepted");
        Ok(call_id)
    }

    /// Forces teardown of a live call: the session FSM synchronously
    /// enters HANGING_UP and the switch leg is killed.
    pub async fn hangup(&self, call_id: &str) -> Result<()> {
        let handle = self
            .registry
            .get(call_id)
            .ok_or_else(|| TelfioError::NotFound(format!("call {call_id}")))?;
        let _ = handle.commands.send(SessionCommand::Hangup).await;

        if let Err(e) = self.switch.hangup(call_id).await {
            // The session is already tearing down; a dead switch leg is
            // not fatal to the hangup request.
            warn!(call_id, error = %e, "switch hangup failed");
        }
        Ok(())
    }
}
