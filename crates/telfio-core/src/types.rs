// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types used across adapter traits and the Telfio engine.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Telephony sample rate in Hz. Fixed for the whole engine.
pub const SAMPLE_RATE: u32 = 8000;
/// Duration of one PCM frame in milliseconds.
pub const FRAME_MS: u64 = 20;
/// Samples per frame (20 ms at 8 kHz).
pub const FRAME_SAMPLES: usize = 160;
/// Bytes per frame (160 samples, 16-bit little-endian).
pub const FRAME_BYTES: usize = 320;

/// States of the per-call session FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// Created, awaiting switch connect.
    Pending,
    /// Playing the initial assistant utterance.
    Greeting,
    /// Awaiting user speech.
    Listening,
    /// LLM streaming a reply.
    Thinking,
    /// TTS playback in progress.
    Speaking,
    /// Teardown in progress.
    HangingUp,
    /// Terminal.
    Ended,
}

impl CallState {
    /// True for states in which the session holds a live switch connection.
    pub fn is_active(self) -> bool {
        !matches!(self, CallState::Pending | CallState::Ended)
    }
}

/// Call direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Transcript entry role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Assistant,
    User,
}

/// One committed transcript entry. Interims are never represented here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    /// ISO 8601 commit timestamp.
    pub ts: String,
    /// Audio duration delivered for this entry, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_ms: Option<u64>,
}

/// Prompt configuration captured at call admission.
///
/// A snapshot is immutable for the lifetime of its call: editing the
/// underlying prompt row does not alter in-flight calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSnapshot {
    pub prompt_id: Option<i64>,
    pub system_prompt: String,
    pub voice_id: String,
    pub llm_model: String,
    pub temperature: f64,
    pub greeting_text: Option<String>,
    pub greeting_duration_ms: Option<f64>,
}

/// Terminal status of a finished call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Completed,
    Failed,
}

/// Outcome reported when a session reaches `Ended`.
///
/// `connect_failure` distinguishes calls the switch never answered from
/// post-answer failures; campaign retry policy only retries the former.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallOutcome {
    pub status: TerminalStatus,
    pub reached_listening: bool,
    pub connect_failure: bool,
    pub duration_seconds: f64,
    pub error: Option<String>,
}

/// Out-of-band JSON control frames on the switch media WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SwitchControlMsg {
    Metadata {
        #[serde(default)]
        uuid: Option<String>,
        #[serde(default)]
        caller: Option<String>,
        #[serde(default)]
        called: Option<String>,
    },
    Dtmf {
        digit: String,
    },
    Hangup,
}

/// Lock-free observability snapshot of one live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub call_id: String,
    pub state: CallState,
    pub direction: Direction,
    pub caller_number: Option<String>,
    pub called_number: Option<String>,
    pub campaign_id: Option<i64>,
    pub started_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn call_state_display_is_snake_case() {
        assert_eq!(CallState::HangingUp.to_string(), "hanging_up");
        assert_eq!(CallState::Pending.to_string(), "pending");
        assert_eq!(CallState::from_str("speaking").unwrap(), CallState::Speaking);
    }

    #[test]
    fn active_states() {
        assert!(!CallState::Pending.is_active());
        assert!(!CallState::Ended.is_active());
        assert!(CallState::Listening.is_active());
        assert!(CallState::HangingUp.is_active());
    }

    #[test]
    fn frame_constants_line_up() {
        assert_eq!(FRAME_SAMPLES, (SAMPLE_RATE as usize / 1000) * FRAME_MS as usize);
        assert_eq!(FRAME_BYTES, FRAME_SAMPLES * 2);
    }

    #[test]
    fn switch_control_frames_deserialize() {
        let m: SwitchControlMsg =
            serde_json::from_str(r#"{"type":"metadata","caller":"5511999","called":"5511888"}"#)
                .unwrap();
        assert!(matches!(m, SwitchControlMsg::Metadata { .. }));

        let d: SwitchControlMsg = serde_json::from_str(r#"{"type":"dtmf","digit":"1"}"#).unwrap();
        assert!(matches!(d, SwitchControlMsg::Dtmf { ref digit } if digit == "1"));

        let h: SwitchControlMsg = serde_json::from_str(r#"{"type":"hangup"}"#).unwrap();
        assert!(matches!(h, SwitchControlMsg::Hangup));
    }
}
