// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lifecycle events fanned out on the process-wide broadcast bus.
//!
//! Producers: sessions (call.*), the campaign runner (campaign.completed).
//! Consumers: the webhook dispatcher, the dashboard WebSocket, and the
//! campaign/schedule runners (which watch for their bound calls ending).

use serde::{Deserialize, Serialize};

use crate::types::CallOutcome;

/// Event kinds carried on the bus and deliverable via webhooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CallStarted,
    CallStateChanged,
    CallEnded,
    CallFailed,
    CampaignCompleted,
}

impl EventKind {
    /// Dotted wire name used in webhook bodies and subscriptions.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::CallStarted => "call.started",
            EventKind::CallStateChanged => "call.state_changed",
            EventKind::CallEnded => "call.ended",
            EventKind::CallFailed => "call.failed",
            EventKind::CampaignCompleted => "campaign.completed",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "call.started" => Some(EventKind::CallStarted),
            "call.state_changed" => Some(EventKind::CallStateChanged),
            "call.ended" => Some(EventKind::CallEnded),
            "call.failed" => Some(EventKind::CallFailed),
            "campaign.completed" => Some(EventKind::CampaignCompleted),
            _ => None,
        }
    }
}

/// One lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub kind: EventKind,
    /// Originating call, absent for campaign-level events.
    pub call_id: Option<String>,
    /// ISO 8601 UTC generation time.
    pub timestamp: String,
    /// Event-specific payload (webhook `data` field).
    pub data: serde_json::Value,
}

impl LifecycleEvent {
    pub fn now(kind: EventKind, call_id: Option<String>, data: serde_json::Value) -> Self {
        Self {
            kind,
            call_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
            data,
        }
    }

    /// Convenience constructor for a call-terminal event. Carries the full
    /// outcome so campaign/schedule runners can apply their outcome rules
    /// without another lookup.
    pub fn call_ended(call_id: &str, outcome: &CallOutcome, transcript: serde_json::Value) -> Self {
        Self::now(
            EventKind::CallEnded,
            Some(call_id.to_string()),
            serde_json::json!({
                "call_id": call_id,
                "status": outcome.status,
                "duration_seconds": outcome.duration_seconds,
                "reached_listening": outcome.reached_listening,
                "connect_failure": outcome.connect_failure,
                "error": outcome.error,
                "transcript": transcript,
            }),
        )
    }

    /// Parses the outcome fields back out of a `call.ended` event.
    pub fn ended_outcome(&self) -> Option<CallOutcome> {
        if self.kind != EventKind::CallEnded {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip() {
        for kind in [
            EventKind::CallStarted,
            EventKind::CallStateChanged,
            EventKind::CallEnded,
            EventKind::CallFailed,
            EventKind::CampaignCompleted,
        ] {
            assert_eq!(EventKind::from_wire(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::from_wire("call.unknown"), None);
    }

    #[test]
    fn ended_outcome_round_trips() {
        let outcome = CallOutcome {
            status: crate::types::TerminalStatus::Completed,
            reached_listening: true,
            connect_failure: false,
            duration_seconds: 12.5,
            error: None,
        };
        let ev = LifecycleEvent::call_ended("c1", &outcome, serde_json::json!([]));
        let parsed = ev.ended_outcome().expect("outcome should parse");
        assert_eq!(parsed.status, outcome.status);
        assert!(parsed.reached_listening);
        assert!(!parsed.connect_failure);

        let other = LifecycleEvent::now(EventKind::CallStarted, None, serde_json::json!({}));
        assert!(other.ended_outcome().is_none());
    }

    #[test]
    fn event_carries_rfc3339_timestamp() {
        let ev = LifecycleEvent::now(EventKind::CallStarted, Some("c1".into()), serde_json::json!({}));
        assert!(chrono::DateTime::parse_from_rfc3339(&ev.timestamp).is_ok());
    }
}
