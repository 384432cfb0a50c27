// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence gateway trait and its row types.
//!
//! The gateway guarantees that `insert_call` is idempotent on `call_id` and
//! that `append_message` preserves insertion order per call. Timestamps are
//! ISO 8601 UTC text throughout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{TerminalStatus, TranscriptEntry};

/// A persisted call record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRow {
    pub id: i64,
    pub call_id: String,
    pub switch_uuid: Option<String>,
    pub caller_number: Option<String>,
    pub called_number: Option<String>,
    pub prompt_id: Option<i64>,
    /// "pending", "active", "completed", "failed".
    pub status: String,
    /// "inbound" or "outbound".
    pub direction: String,
    pub start_time: String,
    pub answer_time: Option<String>,
    pub end_time: Option<String>,
    pub duration_seconds: Option<f64>,
    pub summary: Option<String>,
    pub created_at: String,
}

/// Fields for a new call row.
#[derive(Debug, Clone)]
pub struct NewCall {
    pub call_id: String,
    pub switch_uuid: Option<String>,
    pub caller_number: Option<String>,
    pub called_number: Option<String>,
    pub prompt_id: Option<i64>,
    pub direction: String,
    pub start_time: String,
}

/// A persisted transcript message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallMessageRow {
    pub id: i64,
    pub call_id: String,
    pub role: String,
    pub content: String,
    pub audio_duration_ms: Option<i64>,
    pub timestamp: String,
}

/// A prompt configuration row. Exactly one row has `is_active` set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: String,
    pub voice_id: String,
    pub llm_model: String,
    pub temperature: f64,
    pub greeting_text: Option<String>,
    pub greeting_duration_ms: Option<f64>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields for creating or updating a prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPrompt {
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: String,
    pub voice_id: String,
    pub llm_model: String,
    pub temperature: f64,
    pub greeting_text: Option<String>,
}

/// A dialing campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub prompt_id: Option<i64>,
    /// "pending", "running", "paused", "completed".
    pub status: String,
    pub max_concurrent: i64,
    pub total_contacts: i64,
    pub completed_contacts: i64,
    pub failed_contacts: i64,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

/// Fields for a new campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCampaign {
    pub name: String,
    pub description: Option<String>,
    pub prompt_id: Option<i64>,
    pub max_concurrent: i64,
}

/// One contact within a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactRow {
    pub id: i64,
    pub campaign_id: i64,
    pub phone_number: String,
    pub name: Option<String>,
    /// JSON object of extra CSV columns.
    pub extra_data: Option<String>,
    /// "pending", "calling", "completed", "failed".
    pub status: String,
    pub call_id: Option<String>,
    pub attempts: i64,
    pub last_attempt_at: Option<String>,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
}

/// Fields for importing a contact.
#[derive(Debug, Clone, PartialEq)]
pub struct NewContact {
    pub phone_number: String,
    pub name: Option<String>,
    pub extra_data: Option<String>,
}

/// Result of a contact import.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ImportSummary {
    pub imported: u64,
    pub duplicates: u64,
}

/// Per-status contact counts for one campaign.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ContactCounts {
    pub pending: i64,
    pub calling: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
}

/// A one-off scheduled call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledCallRow {
    pub id: i64,
    pub phone_number: String,
    pub prompt_id: Option<i64>,
    pub scheduled_time: String,
    /// "pending", "executing", "completed", "cancelled", "failed".
    pub status: String,
    pub call_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields for a new scheduled call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewScheduledCall {
    pub phone_number: String,
    pub prompt_id: Option<i64>,
    pub scheduled_time: String,
    pub notes: Option<String>,
}

/// A webhook endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfigRow {
    pub id: i64,
    pub url: String,
    /// Subscribed event names (dotted wire form).
    pub events: Vec<String>,
    pub is_active: bool,
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields for creating or updating a webhook configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWebhookConfig {
    pub url: String,
    pub events: Vec<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// One webhook delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookLogRow {
    pub id: i64,
    pub config_id: i64,
    pub event_type: String,
    pub payload: String,
    pub status_code: Option<i64>,
    pub response_body: Option<String>,
    pub attempt: i64,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: String,
}

/// Fields for logging a delivery attempt.
#[derive(Debug, Clone)]
pub struct NewWebhookLog {
    pub config_id: i64,
    pub event_type: String,
    pub payload: String,
    pub status_code: Option<i64>,
    pub response_body: Option<String>,
    pub attempt: i64,
    pub success: bool,
    pub error_message: Option<String>,
}

/// A settings key/value row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingRow {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    pub is_secret: bool,
    pub updated_at: String,
}

/// Narrow persistence interface consumed by the engine.
///
/// Implemented by `telfio-storage`'s SQLite backend and by the in-memory
/// store in `telfio-test-utils`.
#[async_trait]
pub trait CallStore: Send + Sync {
    // --- calls ---

    /// Inserts a call row. Idempotent on `call_id`: re-insertion is a no-op.
    async fn insert_call(&self, call: &NewCall) -> Result<()>;

    /// Marks a call active on switch connect, recording the switch UUID and
    /// caller/called numbers when the metadata frame carries them.
    async fn mark_call_active(
        &self,
        call_id: &str,
        switch_uuid: Option<&str>,
        caller_number: Option<&str>,
        called_number: Option<&str>,
        answer_time: &str,
    ) -> Result<()>;

    /// Appends one committed transcript entry, preserving insertion order.
    async fn append_message(&self, call_id: &str, entry: &TranscriptEntry) -> Result<()>;

    /// Records the terminal outcome of a call.
    async fn finalize_call(
        &self,
        call_id: &str,
        outcome: TerminalStatus,
        end_time: &str,
        duration_seconds: f64,
        summary: Option<&str>,
    ) -> Result<()>;

    async fn get_call(&self, call_id: &str) -> Result<Option<CallRow>>;
    async fn list_calls(
        &self,
        page: u32,
        per_page: u32,
        status: Option<&str>,
    ) -> Result<(Vec<CallRow>, u64)>;
    async fn get_messages(&self, call_id: &str) -> Result<Vec<CallMessageRow>>;
    async fn delete_call(&self, call_id: &str) -> Result<bool>;

    /// Startup recovery: marks calls left "pending"/"active" as failed.
    /// Returns the number of rows touched.
    async fn mark_stale_calls_failed(&self) -> Result<u64>;

    // --- prompts ---

    async fn create_prompt(&self, prompt: &NewPrompt) -> Result<PromptRow>;
    async fn update_prompt(&self, id: i64, prompt: &NewPrompt) -> Result<Option<PromptRow>>;
    async fn get_prompt(&self, id: i64) -> Result<Option<PromptRow>>;
    async fn list_prompts(&self) -> Result<Vec<PromptRow>>;
    async fn delete_prompt(&self, id: i64) -> Result<bool>;

    /// Atomically makes `id` the single active prompt.
    async fn activate_prompt(&self, id: i64) -> Result<()>;
    async fn active_prompt(&self) -> Result<Option<PromptRow>>;

    /// Caches the measured greeting synthesis duration.
    async fn set_greeting_duration(&self, id: i64, duration_ms: f64) -> Result<()>;

    // --- campaigns ---

    async fn create_campaign(&self, campaign: &NewCampaign) -> Result<CampaignRow>;
    async fn get_campaign(&self, id: i64) -> Result<Option<CampaignRow>>;
    async fn list_campaigns(&self) -> Result<Vec<CampaignRow>>;
    async fn delete_campaign(&self, id: i64) -> Result<bool>;

    /// Sets campaign status; stamps started_at/completed_at as appropriate.
    async fn set_campaign_status(&self, id: i64, status: &str) -> Result<()>;

    /// Adds contacts, silently skipping numbers already in the campaign.
    async fn add_contacts(
        &self,
        campaign_id: i64,
        contacts: &[NewContact],
    ) -> Result<ImportSummary>;
    async fn list_contacts(&self, campaign_id: i64) -> Result<Vec<ContactRow>>;

    /// Atomically claims up to `limit` dialable pending contacts, marking
    /// them "calling" and bumping `attempts`. A previously failed connect
    /// becomes dialable again `retry_after_secs` after its last attempt.
    async fn claim_pending_contacts(
        &self,
        campaign_id: i64,
        limit: i64,
        retry_after_secs: i64,
    ) -> Result<Vec<ContactRow>>;

    async fn bind_contact_call(&self, contact_id: i64, call_id: &str) -> Result<()>;

    /// Terminal contact update: "completed" or "failed" with optional error.
    async fn finish_contact(
        &self,
        contact_id: i64,
        status: TerminalStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Returns a connect-failed contact to "pending" for a later retry.
    async fn requeue_contact(&self, contact_id: i64, error: &str) -> Result<()>;

    async fn campaign_counts(&self, campaign_id: i64) -> Result<ContactCounts>;

    /// Rolls contact counts up into the campaign stats columns.
    async fn refresh_campaign_stats(&self, campaign_id: i64) -> Result<()>;

    // --- scheduled calls ---

    async fn create_scheduled_call(&self, call: &NewScheduledCall) -> Result<ScheduledCallRow>;
    async fn get_scheduled_call(&self, id: i64) -> Result<Option<ScheduledCallRow>>;
    async fn list_scheduled_calls(&self, status: Option<&str>) -> Result<Vec<ScheduledCallRow>>;

    /// Pending schedules whose time is at or before `now`.
    async fn due_scheduled_calls(&self, now: &str) -> Result<Vec<ScheduledCallRow>>;

    /// Conditional pending → executing transition. False if already taken.
    async fn mark_schedule_executing(&self, id: i64) -> Result<bool>;
    async fn bind_schedule_call(&self, id: i64, call_id: &str) -> Result<()>;
    async fn finish_schedule(&self, id: i64, status: TerminalStatus) -> Result<()>;

    /// Cancels a schedule. `Conflict` unless it is still "pending".
    async fn cancel_scheduled_call(&self, id: i64) -> Result<()>;

    // --- webhooks ---

    async fn create_webhook(&self, config: &NewWebhookConfig) -> Result<WebhookConfigRow>;
    async fn get_webhook(&self, id: i64) -> Result<Option<WebhookConfigRow>>;
    async fn list_webhooks(&self) -> Result<Vec<WebhookConfigRow>>;
    async fn update_webhook(
        &self,
        id: i64,
        config: &NewWebhookConfig,
    ) -> Result<Option<WebhookConfigRow>>;
    async fn delete_webhook(&self, id: i64) -> Result<bool>;

    /// Active configurations subscribed to the given event name.
    async fn active_webhooks_for(&self, event: &str) -> Result<Vec<WebhookConfigRow>>;

    async fn log_webhook_delivery(&self, log: &NewWebhookLog) -> Result<()>;
    async fn list_webhook_logs(&self, config_id: i64, limit: i64) -> Result<Vec<WebhookLogRow>>;

    // --- settings ---

    async fn get_setting(&self, key: &str) -> Result<Option<SettingRow>>;
    async fn set_setting(
        &self,
        key: &str,
        value: &str,
        description: Option<&str>,
        is_secret: bool,
    ) -> Result<()>;
    async fn list_settings(&self) -> Result<Vec<SettingRow>>;
}
