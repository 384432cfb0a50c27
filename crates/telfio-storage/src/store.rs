// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the [`CallStore`] persistence gateway.

use async_trait::async_trait;
use telfio_core::traits::{
    CallMessageRow, CallRow, CallStore, CampaignRow, ContactCounts, ContactRow, ImportSummary,
    NewCall, NewCampaign, NewContact, NewPrompt, NewScheduledCall, NewWebhookConfig,
    NewWebhookLog, PromptRow, ScheduledCallRow, SettingRow, WebhookConfigRow, WebhookLogRow,
};
use telfio_core::types::{TerminalStatus, TranscriptEntry};
use telfio_core::Result;

use crate::database::Database;
use crate::queries;

/// The SQLite-backed persistence gateway.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    /// Opens the database (running migrations) and wraps it.
    pub async fn open(path: &str) -> Result<Self> {
        Ok(Self {
            db: Database::open(path).await?,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn close(&self) -> Result<()> {
        self.db.close().await
    }
}

#[async_trait]
impl CallStore for SqliteStore {
    async fn insert_call(&self, call: &NewCall) -> Result<()> {
        queries::calls::insert_call(&self.db, call).await
    }

    async fn mark_call_active(
        &self,
        call_id: &str,
        switch_uuid: Option<&str>,
        caller_number: Option<&str>,
        called_number: Option<&str>,
        answer_time: &str,
    ) -> Result<()> {
        queries::calls::mark_call_active(
            &self.db,
            call_id,
            switch_uuid,
            caller_number,
            called_number,
            answer_time,
        )
        .await
    }

    async fn append_message(&self, call_id: &str, entry: &TranscriptEntry) -> Result<()> {
        queries::calls::append_message(&self.db, call_id, entry).await
    }

    async fn finalize_call(
        &self,
        call_id: &str,
        outcome: TerminalStatus,
        end_time: &str,
        duration_seconds: f64,
        summary: Option<&str>,
    ) -> Result<()> {
        queries::calls::finalize_call(&self.db, call_id, outcome, end_time, duration_seconds, summary)
            .await
    }

    async fn get_call(&self, call_id: &str) -> Result<Option<CallRow>> {
        queries::calls::get_call(&self.db, call_id).await
    }

    async fn list_calls(
        &self,
        page: u32,
        per_page: u32,
        status: Option<&str>,
    ) -> Result<(Vec<CallRow>, u64)> {
        queries::calls::list_calls(&self.db, page, per_page, status).await
    }

    async fn get_messages(&self, call_id: &str) -> Result<Vec<CallMessageRow>> {
        queries::calls::get_messages(&self.db, call_id).await
    }

    async fn delete_call(&self, call_id: &str) -> Result<bool> {
        queries::calls::delete_call(&self.db, call_id).await
    }

    async fn mark_stale_calls_failed(&self) -> Result<u64> {
        queries::calls::mark_stale_calls_failed(&self.db).await
    }

    async fn create_prompt(&self, prompt: &NewPrompt) -> Result<PromptRow> {
        queries::prompts::create_prompt(&self.db, prompt).await
    }

    async fn update_prompt(&self, id: i64, prompt: &NewPrompt) -> Result<Option<PromptRow>> {
        queries::prompts::update_prompt(&self.db, id, prompt).await
    }

    async fn get_prompt(&self, id: i64) -> Result<Option<PromptRow>> {
        queries::prompts::get_prompt(&self.db, id).await
    }

    async fn list_prompts(&self) -> Result<Vec<PromptRow>> {
        queries::prompts::list_prompts(&self.db).await
    }

    async fn delete_prompt(&self, id: i64) -> Result<bool> {
        queries::prompts::delete_prompt(&self.db, id).await
    }

    async fn activate_prompt(&self, id: i64) -> Result<()> {
        queries::prompts::activate_prompt(&self.db, id).await
    }

    async fn active_prompt(&self) -> Result<Option<PromptRow>> {
        queries::prompts::active_prompt(&self.db).await
    }

    async fn set_greeting_duration(&self, id: i64, duration_ms: f64) -> Result<()> {
        queries::prompts::set_greeting_duration(&self.db, id, duration_ms).await
    }

    async fn create_campaign(&self, campaign: &NewCampaign) -> Result<CampaignRow> {
        queries::campaigns::create_campaign(&self.db, campaign).await
    }

    async fn get_campaign(&self, id: i64) -> Result<Option<CampaignRow>> {
        queries::campaigns::get_campaign(&self.db, id).await
    }

    async fn list_campaigns(&self) -> Result<Vec<CampaignRow>> {
        queries::campaigns::list_campaigns(&self.db).await
    }

    async fn delete_campaign(&self, id: i64) -> Result<bool> {
        queries::campaigns::delete_campaign(&self.db, id).await
    }

    async fn set_campaign_status(&self, id: i64, status: &str) -> Result<()> {
        queries::campaigns::set_campaign_status(&self.db, id, status).await
    }

    async fn add_contacts(
        &self,
        campaign_id: i64,
        contacts: &[NewContact],
    ) -> Result<ImportSummary> {
        queries::campaigns::add_contacts(&self.db, campaign_id, contacts).await
    }

    async fn list_contacts(&self, campaign_id: i64) -> Result<Vec<ContactRow>> {
        queries::campaigns::list_contacts(&self.db, campaign_id).await
    }

    async fn claim_pending_contacts(
        &self,
        campaign_id: i64,
        limit: i64,
        retry_after_secs: i64,
    ) -> Result<Vec<ContactRow>> {
        queries::campaigns::claim_pending_contacts(&self.db, campaign_id, limit, retry_after_secs)
            .await
    }

    async fn bind_contact_call(&self, contact_id: i64, call_id: &str) -> Result<()> {
        queries::campaigns::bind_contact_call(&self.db, contact_id, call_id).await
    }

    async fn finish_contact(
        &self,
        contact_id: i64,
        status: TerminalStatus,
        error: Option<&str>,
    ) -> Result<()> {
        queries::campaigns::finish_contact(&self.db, contact_id, status, error).await
    }

    async fn requeue_contact(&self, contact_id: i64, error: &str) -> Result<()> {
        queries::campaigns::requeue_contact(&self.db, contact_id, error).await
    }

    async fn campaign_counts(&self, campaign_id: i64) -> Result<ContactCounts> {
        queries::campaigns::campaign_counts(&self.db, campaign_id).await
    }

    async fn refresh_campaign_stats(&self, campaign_id: i64) -> Result<()> {
        queries::campaigns::refresh_campaign_stats(&self.db, campaign_id).await
    }

    async fn create_scheduled_call(&self, call: &NewScheduledCall) -> Result<ScheduledCallRow> {
        queries::schedules::create_scheduled_call(&self.db, call).await
    }

    async fn get_scheduled_call(&self, id: i64) -> Result<Option<ScheduledCallRow>> {
        queries::schedules::get_scheduled_call(&self.db, id).await
    }

    async fn list_scheduled_calls(&self, status: Option<&str>) -> Result<Vec<ScheduledCallRow>> {
        queries::schedules::list_scheduled_calls(&self.db, status).await
    }

    async fn due_scheduled_calls(&self, now: &str) -> Result<Vec<ScheduledCallRow>> {
        queries::schedules::due_scheduled_calls(&self.db, now).await
    }

    async fn mark_schedule_executing(&self, id: i64) -> Result<bool> {
        queries::schedules::mark_schedule_executing(&self.db, id).await
    }

    async fn bind_schedule_call(&self, id: i64, call_id: &str) -> Result<()> {
        queries::schedules::bind_schedule_call(&self.db, id, call_id).await
    }

    async fn finish_schedule(&self, id: i64, status: TerminalStatus) -> Result<()> {
        queries::schedules::finish_schedule(&self.db, id, status).await
    }

    async fn cancel_scheduled_call(&self, id: i64) -> Result<()> {
        queries::schedules::cancel_scheduled_call(&self.db, id).await
    }

    async fn create_webhook(&self, config: &NewWebhookConfig) -> Result<WebhookConfigRow> {
        queries::webhooks::create_webhook(&self.db, config).await
    }

    async fn get_webhook(&self, id: i64) -> Result<Option<WebhookConfigRow>> {
        queries::webhooks::get_webhook(&self.db, id).await
    }

    async fn list_webhooks(&self) -> Result<Vec<WebhookConfigRow>> {
        queries::webhooks::list_webhooks(&self.db).await
    }

    async fn update_webhook(
        &self,
        id: i64,
        config: &NewWebhookConfig,
    ) -> Result<Option<WebhookConfigRow>> {
        queries::webhooks::update_webhook(&self.db, id, config).await
    }

    async fn delete_webhook(&self, id: i64) -> Result<bool> {
        queries::webhooks::delete_webhook(&self.db, id).await
    }

    async fn active_webhooks_for(&self, event: &str) -> Result<Vec<WebhookConfigRow>> {
        queries::webhooks::active_webhooks_for(&self.db, event).await
    }

    async fn log_webhook_delivery(&self, log: &NewWebhookLog) -> Result<()> {
        queries::webhooks::log_webhook_delivery(&self.db, log).await
    }

    async fn list_webhook_logs(&self, config_id: i64, limit: i64) -> Result<Vec<WebhookLogRow>> {
        queries::webhooks::list_webhook_logs(&self.db, config_id, limit).await
    }

    async fn get_setting(&self, key: &str) -> Result<Option<SettingRow>> {
        queries::settings::get_setting(&self.db, key).await
    }

    async fn set_setting(
        &self,
        key: &str,
        value: &str,
        description: Option<&str>,
        is_secret: bool,
    ) -> Result<()> {
        queries::settings::set_setting(&self.db, key, value, description, is_secret).await
    }

    async fn list_settings(&self) -> Result<Vec<SettingRow>> {
        queries::settings::list_settings(&self.db).await
    }
}
