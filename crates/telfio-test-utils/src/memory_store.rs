// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory [`CallStore`] implementation mirroring the SQLite gateway's
//! semantics, for tests that do not want a database on disk.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use tokio::sync::Mutex;

use telfio_core::traits::{
    CallMessageRow, CallRow, CallStore, CampaignRow, ContactCounts, ContactRow, ImportSummary,
    NewCall, NewCampaign, NewContact, NewPrompt, NewScheduledCall, NewWebhookConfig,
    NewWebhookLog, PromptRow, ScheduledCallRow, SettingRow, WebhookConfigRow, WebhookLogRow,
};
use telfio_core::types::{TerminalStatus, TranscriptEntry};
use telfio_core::{Result, TelfioError};

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    calls: Vec<CallRow>,
    messages: Vec<CallMessageRow>,
    prompts: Vec<PromptRow>,
    campaigns: Vec<CampaignRow>,
    contacts: Vec<ContactRow>,
    schedules: Vec<ScheduledCallRow>,
    webhooks: Vec<WebhookConfigRow>,
    webhook_logs: Vec<WebhookLogRow>,
    settings: Vec<SettingRow>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory persistence gateway.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl CallStore for MemoryStore {
    async fn insert_call(&self, call: &NewCall) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.calls.iter().any(|c| c.call_id == call.call_id) {
            return Ok(());
        }
        let id = inner.next_id();
        inner.calls.push(CallRow {
            id,
            call_id: call.call_id.clone(),
            switch_uuid: call.switch_uuid.clone(),
            caller_number: call.caller_number.clone(),
            called_number: call.called_number.clone(),
            prompt_id: call.prompt_id,
            status: "pending".to_string(),
            direction: call.direction.clone(),
            start_time: call.start_time.clone(),
            answer_time: None,
            end_time: None,
            duration_seconds: None,
            summary: None,
            created_at: now_iso(),
        });
        Ok(())
    }

    async fn mark_call_active(
        &self,
        call_id: &str,
        switch_uuid: Option<&str>,
        caller_number: Option<&str>,
        called_number: Option<&str>,
        answer_time: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(call) = inner.calls.iter_mut().find(|c| c.call_id == call_id) {
            call.status = "active".to_string();
            if switch_uuid.is_some() {
                call.switch_uuid = switch_uuid.map(str::to_string);
            }
            if caller_number.is_some() {
                call.caller_number = caller_number.map(str::to_string);
            }
            if called_number.is_some() {
                call.called_number = called_number.map(str::to_string);
            }
            call.answer_time = Some(answer_time.to_string());
        }
        Ok(())
    }

    async fn append_message(&self, call_id: &str, entry: &TranscriptEntry) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id();
        inner.messages.push(CallMessageRow {
            id,
            call_id: call_id.to_string(),
            role: entry.role.to_string(),
            content: entry.content.clone(),
            audio_duration_ms: entry.audio_ms.map(|ms| ms as i64),
            timestamp: entry.ts.clone(),
        });
        Ok(())
    }

    async fn finalize_call(
        &self,
        call_id: &str,
        outcome: TerminalStatus,
        end_time: &str,
        duration_seconds: f64,
        summary: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(call) = inner.calls.iter_mut().find(|c| c.call_id == call_id) {
            call.status = outcome.to_string();
            call.end_time = Some(end_time.to_string());
            call.duration_seconds = Some(duration_seconds);
            if summary.is_some() {
                call.summary = summary.map(str::to_string);
            }
        }
        Ok(())
    }

    async fn get_call(&self, call_id: &str) -> Result<Option<CallRow>> {
        let inner = self.inner.lock().await;
        Ok(inner.calls.iter().find(|c| c.call_id == call_id).cloned())
    }

    async fn list_calls(
        &self,
        page: u32,
        per_page: u32,
        status: Option<&str>,
    ) -> Result<(Vec<CallRow>, u64)> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<CallRow> = inner
            .calls
            .iter()
            .filter(|c| status.is_none_or(|s| c.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        let total = rows.len() as u64;
        let per_page = per_page.max(1) as usize;
        let offset = (page.max(1) as usize - 1) * per_page;
        let rows = rows.into_iter().skip(offset).take(per_page).collect();
        Ok((rows, total))
    }

    async fn get_messages(&self, call_id: &str) -> Result<Vec<CallMessageRow>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .messages
            .iter()
            .filter(|m| m.call_id == call_id)
            .cloned()
            .collect())
    }

    async fn delete_call(&self, call_id: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let before = inner.calls.len();
        inner.calls.retain(|c| c.call_id != call_id);
        inner.messages.retain(|m| m.call_id != call_id);
        Ok(inner.calls.len() < before)
    }

    async fn mark_stale_calls_failed(&self) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let end_time = now_iso();
        let mut touched = 0;
        for call in inner
            .calls
            .iter_mut()
            .filter(|c| c.status == "pending" || c.status == "active")
        {
            call.status = "failed".to_string();
            call.end_time = Some(end_time.clone());
            touched += 1;
        }
        Ok(touched)
    }

    async fn create_prompt(&self, prompt: &NewPrompt) -> Result<PromptRow> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id();
        let now = now_iso();
        let row = PromptRow {
            id,
            name: prompt.name.clone(),
            description: prompt.description.clone(),
            system_prompt: prompt.system_prompt.clone(),
            voice_id: prompt.voice_id.clone(),
            llm_model: prompt.llm_model.clone(),
            temperature: prompt.temperature,
            greeting_text: prompt.greeting_text.clone(),
            greeting_duration_ms: None,
            is_active: false,
            created_at: now.clone(),
            updated_at: now,
        };
        inner.prompts.push(row.clone());
        Ok(row)
    }

    async fn update_prompt(&self, id: i64, prompt: &NewPrompt) -> Result<Option<PromptRow>> {
        let mut inner = self.inner.lock().await;
        let Some(row) = inner.prompts.iter_mut().find(|p| p.id == id) else {
            return Ok(None);
        };
        row.name = prompt.name.clone();
        row.description = prompt.description.clone();
        row.system_prompt = prompt.system_prompt.clone();
        row.voice_id = prompt.voice_id.clone();
        row.llm_model = prompt.llm_model.clone();
        row.temperature = prompt.temperature;
        row.greeting_text = prompt.greeting_text.clone();
        row.greeting_duration_ms = None;
        row.updated_at = now_iso();
        Ok(Some(row.clone()))
    }

    async fn get_prompt(&self, id: i64) -> Result<Option<PromptRow>> {
        let inner = self.inner.lock().await;
        Ok(inner.prompts.iter().find(|p| p.id == id).cloned())
    }

    async fn list_prompts(&self) -> Result<Vec<PromptRow>> {
        let inner = self.inner.lock().await;
        Ok(inner.prompts.clone())
    }

    async fn delete_prompt(&self, id: i64) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let before = inner.prompts.len();
        inner.prompts.retain(|p| p.id != id);
        Ok(inner.prompts.len() < before)
    }

    async fn activate_prompt(&self, id: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.prompts.iter().any(|p| p.id == id) {
            return Err(TelfioError::NotFound(format!("prompt {id}")));
        }
        for prompt in inner.prompts.iter_mut() {
            prompt.is_active = prompt.id == id;
        }
        Ok(())
    }

    async fn active_prompt(&self) -> Result<Option<PromptRow>> {
        let inner = self.inner.lock().await;
        Ok(inner.prompts.iter().find(|p| p.is_active).cloned())
    }

    async fn set_greeting_duration(&self, id: i64, duration_ms: f64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(prompt) = inner.prompts.iter_mut().find(|p| p.id == id) {
            prompt.greeting_duration_ms = Some(duration_ms);
        }
        Ok(())
    }

    async fn create_campaign(&self, campaign: &NewCampaign) -> Result<CampaignRow> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id();
        let now = now_iso();
        let row = CampaignRow {
            id,
            name: campaign.name.clone(),
            description: campaign.description.clone(),
            prompt_id: campaign.prompt_id,
            status: "pending".to_string(),
            max_concurrent: campaign.max_concurrent,
            total_contacts: 0,
            completed_contacts: 0,
            failed_contacts: 0,
            created_at: now.clone(),
            updated_at: now,
            started_at: None,
            completed_at: None,
        };
        inner.campaigns.push(row.clone());
        Ok(row)
    }

    async fn get_campaign(&self, id: i64) -> Result<Option<CampaignRow>> {
        let inner = self.inner.lock().await;
        Ok(inner.campaigns.iter().find(|c| c.id == id).cloned())
    }

    async fn list_campaigns(&self) -> Result<Vec<CampaignRow>> {
        let inner = self.inner.lock().await;
        Ok(inner.campaigns.clone())
    }

    async fn delete_campaign(&self, id: i64) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let before = inner.campaigns.len();
        inner.campaigns.retain(|c| c.id != id);
        inner.contacts.retain(|c| c.campaign_id != id);
        Ok(inner.campaigns.len() < before)
    }

    async fn set_campaign_status(&self, id: i64, status: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let now = now_iso();
        if let Some(campaign) = inner.campaigns.iter_mut().find(|c| c.id == id) {
            campaign.status = status.to_string();
            campaign.updated_at = now.clone();
            if status == "running" && campaign.started_at.is_none() {
                campaign.started_at = Some(now.clone());
            }
            if status == "completed" {
                campaign.completed_at = Some(now);
            }
        }
        Ok(())
    }

    async fn add_contacts(
        &self,
        campaign_id: i64,
        contacts: &[NewContact],
    ) -> Result<ImportSummary> {
        let mut inner = self.inner.lock().await;
        let mut summary = ImportSummary { imported: 0, duplicates: 0 };
        for contact in contacts {
            let exists = inner
                .contacts
                .iter()
                .any(|c| c.campaign_id == campaign_id && c.phone_number == contact.phone_number);
            if exists {
                summary.duplicates += 1;
                continue;
            }
            let id = inner.next_id();
            inner.contacts.push(ContactRow {
                id,
                campaign_id,
                phone_number: contact.phone_number.clone(),
                name: contact.name.clone(),
                extra_data: contact.extra_data.clone(),
                status: "pending".to_string(),
                call_id: None,
                attempts: 0,
                last_attempt_at: None,
                completed_at: None,
                error_message: None,
            });
            summary.imported += 1;
        }
        if let Some(campaign) = inner.campaigns.iter_mut().find(|c| c.id == campaign_id) {
            campaign.total_contacts += summary.imported as i64;
        }
        Ok(summary)
    }

    async fn list_contacts(&self, campaign_id: i64) -> Result<Vec<ContactRow>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .contacts
            .iter()
            .filter(|c| c.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    async fn claim_pending_contacts(
        &self,
        campaign_id: i64,
        limit: i64,
        retry_after_secs: i64,
    ) -> Result<Vec<ContactRow>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let mut inner = self.inner.lock().await;
        let cutoff = (Utc::now() - chrono::Duration::seconds(retry_after_secs))
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        let now = now_iso();
        let mut claimed = Vec::new();
        for contact in inner.contacts.iter_mut().filter(|c| {
            c.campaign_id == campaign_id
                && c.status == "pending"
                && c.last_attempt_at.as_deref().is_none_or(|t| t <= cutoff.as_str())
        }) {
            if claimed.len() as i64 >= limit {
                break;
            }
            contact.status = "calling".to_string();
            contact.attempts += 1;
            contact.last_attempt_at = Some(now.clone());
            claimed.push(contact.clone());
        }
        Ok(claimed)
    }

    async fn bind_contact_call(&self, contact_id: i64, call_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(contact) = inner.contacts.iter_mut().find(|c| c.id == contact_id) {
            contact.call_id = Some(call_id.to_string());
        }
        Ok(())
    }

    async fn finish_contact(
        &self,
        contact_id: i64,
        status: TerminalStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(contact) = inner.contacts.iter_mut().find(|c| c.id == contact_id) {
            contact.status = status.to_string();
            contact.completed_at = Some(now_iso());
            contact.error_message = error.map(str::to_string);
        }
        Ok(())
    }

    async fn requeue_contact(&self, contact_id: i64, error: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(contact) = inner.contacts.iter_mut().find(|c| c.id == contact_id) {
            contact.status = "pending".to_string();
            contact.call_id = None;
            contact.error_message = Some(error.to_string());
        }
        Ok(())
    }

    async fn campaign_counts(&self, campaign_id: i64) -> Result<ContactCounts> {
        let inner = self.inner.lock().await;
        let mut counts = ContactCounts::default();
        for contact in inner.contacts.iter().filter(|c| c.campaign_id == campaign_id) {
            counts.total += 1;
            match contact.status.as_str() {
                "pending" => counts.pending += 1,
                "calling" => counts.calling += 1,
                "completed" => counts.completed += 1,
                "failed" => counts.failed += 1,
                _ => {}
            }
        }
        Ok(counts)
    }

    async fn refresh_campaign_stats(&self, campaign_id: i64) -> Result<()> {
        let counts = self.campaign_counts(campaign_id).await?;
        let mut inner = self.inner.lock().await;
        if let Some(campaign) = inner.campaigns.iter_mut().find(|c| c.id == campaign_id) {
            campaign.completed_contacts = counts.completed;
            campaign.failed_contacts = counts.failed;
            campaign.updated_at = now_iso();
        }
        Ok(())
    }

    async fn create_scheduled_call(&self, call: &NewScheduledCall) -> Result<ScheduledCallRow> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id();
        let now = now_iso();
        let row = ScheduledCallRow {
            id,
            phone_number: call.phone_number.clone(),
            prompt_id: call.prompt_id,
            scheduled_time: call.scheduled_time.clone(),
            status: "pending".to_string(),
            call_id: None,
            notes: call.notes.clone(),
            created_at: now.clone(),
            updated_at: now,
        };
        inner.schedules.push(row.clone());
        Ok(row)
    }

    async fn get_scheduled_call(&self, id: i64) -> Result<Option<ScheduledCallRow>> {
        let inner = self.inner.lock().await;
        Ok(inner.schedules.iter().find(|s| s.id == id).cloned())
    }

    async fn list_scheduled_calls(&self, status: Option<&str>) -> Result<Vec<ScheduledCallRow>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .schedules
            .iter()
            .filter(|s| status.is_none_or(|f| s.status == f))
            .cloned()
            .collect())
    }

    async fn due_scheduled_calls(&self, now: &str) -> Result<Vec<ScheduledCallRow>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .schedules
            .iter()
            .filter(|s| s.status == "pending" && s.scheduled_time.as_str() <= now)
            .cloned()
            .collect())
    }

    async fn mark_schedule_executing(&self, id: i64) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if let Some(schedule) = inner
            .schedules
            .iter_mut()
            .find(|s| s.id == id && s.status == "pending")
        {
            schedule.status = "executing".to_string();
            schedule.updated_at = now_iso();
            return Ok(true);
        }
        Ok(false)
    }

    async fn bind_schedule_call(&self, id: i64, call_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(schedule) = inner.schedules.iter_mut().find(|s| s.id == id) {
            schedule.call_id = Some(call_id.to_string());
            schedule.updated_at = now_iso();
        }
        Ok(())
    }

    async fn finish_schedule(&self, id: i64, status: TerminalStatus) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(schedule) = inner.schedules.iter_mut().find(|s| s.id == id) {
            schedule.status = status.to_string();
            schedule.updated_at = now_iso();
        }
        Ok(())
    }

    async fn cancel_scheduled_call(&self, id: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(schedule) = inner.schedules.iter_mut().find(|s| s.id == id) else {
            return Err(TelfioError::NotFound(format!("scheduled call {id}")));
        };
        if schedule.status != "pending" {
            return Err(TelfioError::Conflict(format!(
                "scheduled call {id} is {}, only pending may be cancelled",
                schedule.status
            )));
        }
        schedule.status = "cancelled".to_string();
        schedule.updated_at = now_iso();
        Ok(())
    }

    async fn create_webhook(&self, config: &NewWebhookConfig) -> Result<WebhookConfigRow> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id();
        let now = now_iso();
        let row = WebhookConfigRow {
            id,
            url: config.url.clone(),
            events: config.events.clone(),
            is_active: config.is_active,
            secret: config.secret.clone(),
            created_at: now.clone(),
            updated_at: now,
        };
        inner.webhooks.push(row.clone());
        Ok(row)
    }

    async fn get_webhook(&self, id: i64) -> Result<Option<WebhookConfigRow>> {
        let inner = self.inner.lock().await;
        Ok(inner.webhooks.iter().find(|w| w.id == id).cloned())
    }

    async fn list_webhooks(&self) -> Result<Vec<WebhookConfigRow>> {
        let inner = self.inner.lock().await;
        Ok(inner.webhooks.clone())
    }

    async fn update_webhook(
        &self,
        id: i64,
        config: &NewWebhookConfig,
    ) -> Result<Option<WebhookConfigRow>> {
        let mut inner = self.inner.lock().await;
        let Some(row) = inner.webhooks.iter_mut().find(|w| w.id == id) else {
            return Ok(None);
        };
        row.url = config.url.clone();
        row.events = config.events.clone();
        row.is_active = config.is_active;
        row.secret = config.secret.clone();
        row.updated_at = now_iso();
        Ok(Some(row.clone()))
    }

    async fn delete_webhook(&self, id: i64) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let before = inner.webhooks.len();
        inner.webhooks.retain(|w| w.id != id);
        inner.webhook_logs.retain(|l| l.config_id != id);
        Ok(inner.webhooks.len() < before)
    }

    async fn active_webhooks_for(&self, event: &str) -> Result<Vec<WebhookConfigRow>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .webhooks
            .iter()
            .filter(|w| w.is_active && w.events.iter().any(|e| e == event))
            .cloned()
            .collect())
    }

    async fn log_webhook_delivery(&self, log: &NewWebhookLog) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id();
        inner.webhook_logs.push(WebhookLogRow {
            id,
            config_id: log.config_id,
            event_type: log.event_type.clone(),
            payload: log.payload.clone(),
            status_code: log.status_code,
            response_body: log.response_body.clone(),
            attempt: log.attempt,
            success: log.success,
            error_message: log.error_message.clone(),
            created_at: now_iso(),
        });
        Ok(())
    }

    async fn list_webhook_logs(&self, config_id: i64, limit: i64) -> Result<Vec<WebhookLogRow>> {
        let inner = self.inner.lock().await;
        let mut logs: Vec<WebhookLogRow> = inner
            .webhook_logs
            .iter()
            .filter(|l| l.config_id == config_id)
            .cloned()
            .collect();
        logs.reverse();
        logs.truncate(limit.max(0) as usize);
        Ok(logs)
    }

    async fn get_setting(&self, key: &str) -> Result<Option<SettingRow>> {
        let inner = self.inner.lock().await;
        Ok(inner.settings.iter().find(|s| s.key == key).cloned())
    }

    async fn set_setting(
        &self,
        key: &str,
        value: &str,
        description: Option<&str>,
        is_secret: bool,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(row) = inner.settings.iter_mut().find(|s| s.key == key) {
            row.value = value.to_string();
            if description.is_some() {
                row.description = description.map(str::to_string);
            }
            row.is_secret = is_secret;
            row.updated_at = now_iso();
        } else {
            inner.settings.push(SettingRow {
                key: key.to_string(),
                value: value.to_string(),
                description: description.map(str::to_string),
                is_secret,
                updated_at: now_iso(),
            });
        }
        Ok(())
    }

    async fn list_settings(&self) -> Result<Vec<SettingRow>> {
        let inner = self.inner.lock().await;
        let mut rows = inner.settings.clone();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(rows)
    }
}
