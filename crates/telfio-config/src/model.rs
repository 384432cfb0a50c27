// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Telfio voice agent.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level Telfio configuration.
///
/// Loaded from a TOML file with environment variable overrides for secrets.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TelfioConfig {
    /// Engine identity and limits.
    #[serde(default)]
    pub agent: AgentConfig,

    /// HTTP/WebSocket gateway settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Telephony switch control channel settings.
    #[serde(default)]
    pub switch: SwitchConfig,

    /// Speech-to-text provider settings.
    #[serde(default)]
    pub stt: SttConfig,

    /// Language model provider settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Text-to-speech provider settings.
    #[serde(default)]
    pub tts: TtsConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Per-session timing and barge-in tunables.
    #[serde(default)]
    pub session: SessionConfig,
}

/// Engine identity and limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Display name of the agent.
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Global cap on simultaneously live calls.
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            max_concurrent_calls: default_max_concurrent_calls(),
            log_level: default_log_level(),
        }
    }
}

fn default_agent_name() -> String {
    "telfio".to_string()
}

fn default_max_concurrent_calls() -> usize {
    15
}

fn default_log_level() -> String {
    "info".to_string()
}

/// HTTP/WebSocket gateway settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Base URL the switch uses to reach the media WebSocket
    /// (e.g. "ws://127.0.0.1:8000"). Used in origination commands.
    #[serde(default = "default_media_ws_base")]
    pub media_ws_base: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_gateway_port(),
            media_ws_base: default_media_ws_base(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_gateway_port() -> u16 {
    8000
}

fn default_media_ws_base() -> String {
    "ws://127.0.0.1:8000".to_string()
}

/// Telephony switch control channel (ESL dialect).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SwitchConfig {
    #[serde(default = "default_esl_host")]
    pub esl_host: String,

    #[serde(default = "default_esl_port")]
    pub esl_port: u16,

    /// ESL password. `None` requires the environment variable.
    #[serde(default)]
    pub esl_password: Option<String>,

    /// SIP gateway name used in origination dial strings.
    #[serde(default = "default_sip_gateway")]
    pub sip_gateway: String,

    /// Carrier tech prefix prepended to dialed numbers.
    #[serde(default)]
    pub tech_prefix: String,

    /// Country code prepended to 10-11 digit local numbers.
    #[serde(default = "default_country_code")]
    pub default_country_code: String,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            esl_host: default_esl_host(),
            esl_port: default_esl_port(),
            esl_password: None,
            sip_gateway: default_sip_gateway(),
            tech_prefix: String::new(),
            default_country_code: default_country_code(),
        }
    }
}

fn default_esl_host() -> String {
    "127.0.0.1".to_string()
}

fn default_esl_port() -> u16 {
    8021
}

fn default_sip_gateway() -> String {
    "telfio-trunk".to_string()
}

fn default_country_code() -> String {
    "55".to_string()
}

/// Speech-to-text provider settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SttConfig {
    /// API key. `None` requires the environment variable or a settings row.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Realtime WebSocket endpoint base.
    #[serde(default = "default_stt_base_url")]
    pub base_url: String,

    #[serde(default = "default_stt_model")]
    pub model: String,

    #[serde(default = "default_language")]
    pub language: String,

    /// Provider endpointing window in milliseconds.
    #[serde(default = "default_endpointing_ms")]
    pub endpointing_ms: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_stt_base_url(),
            model: default_stt_model(),
            language: default_language(),
            endpointing_ms: default_endpointing_ms(),
        }
    }
}

fn default_stt_base_url() -> String {
    "wss://api.deepgram.com/v1/listen".to_string()
}

fn default_stt_model() -> String {
    "nova-2".to_string()
}

fn default_language() -> String {
    "pt-BR".to_string()
}

fn default_endpointing_ms() -> u64 {
    300
}

/// Language model provider settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    /// OpenAI-compatible chat completions base URL.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub default_model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_llm_base_url(),
            default_model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4.1-nano".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    500
}

/// Text-to-speech provider settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TtsConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_tts_base_url")]
    pub base_url: String,

    #[serde(default = "default_voice_id")]
    pub default_voice_id: String,

    #[serde(default = "default_tts_style")]
    pub style: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_tts_base_url(),
            default_voice_id: default_voice_id(),
            style: default_tts_style(),
        }
    }
}

fn default_tts_base_url() -> String {
    "https://api.murf.ai/v1".to_string()
}

fn default_voice_id() -> String {
    "pt-BR-isadora".to_string()
}

fn default_tts_style() -> String {
    "conversational".to_string()
}

/// Storage backend settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "telfio.db".to_string()
}

/// Per-session timing and barge-in tunables. Defaults match the engine's
/// documented timeout ladder.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Switch connect deadline after origination, seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// No audio either direction for this long ends the call politely.
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,

    /// LLM first-token deadline before the apology fallback.
    #[serde(default = "default_llm_first_token_timeout")]
    pub llm_first_token_timeout_secs: u64,

    /// TTS first-frame latency that triggers a warning log.
    #[serde(default = "default_tts_warn")]
    pub tts_first_frame_warn_secs: u64,

    /// TTS first-frame deadline before the fallback phrase.
    #[serde(default = "default_tts_timeout")]
    pub tts_first_frame_timeout_secs: u64,

    /// Cumulative interim characters that count as a barge-in.
    #[serde(default = "default_barge_in_chars")]
    pub barge_in_min_chars: usize,

    /// Bound on provider drain during teardown, seconds.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            inactivity_timeout_secs: default_inactivity_timeout(),
            llm_first_token_timeout_secs: default_llm_first_token_timeout(),
            tts_first_frame_warn_secs: default_tts_warn(),
            tts_first_frame_timeout_secs: default_tts_timeout(),
            barge_in_min_chars: default_barge_in_chars(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    45
}

fn default_inactivity_timeout() -> u64 {
    30
}

fn default_llm_first_token_timeout() -> u64 {
    8
}

fn default_tts_warn() -> u64 {
    4
}

fn default_tts_timeout() -> u64 {
    10
}

fn default_barge_in_chars() -> usize {
    3
}

fn default_drain_timeout() -> u64 {
    2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = TelfioConfig::default();
        assert_eq!(config.agent.max_concurrent_calls, 15);
        assert_eq!(config.session.connect_timeout_secs, 45);
        assert_eq!(config.session.inactivity_timeout_secs, 30);
        assert_eq!(config.session.barge_in_min_chars, 3);
        assert_eq!(config.gateway.port, 8000);
    }

    #[test]
    fn empty_toml_parses_to_defaults() {
        let config: TelfioConfig = toml::from_str("").unwrap();
        assert_eq!(config.llm.default_model, "gpt-4.1-nano");
        assert_eq!(config.tts.default_voice_id, "pt-BR-isadora");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: Result<TelfioConfig, _> = toml::from_str("[agent]\nbogus_key = 1\n");
        assert!(result.is_err());
    }

    #[test]
    fn partial_section_overrides() {
        let config: TelfioConfig =
            toml::from_str("[session]\nbarge_in_min_chars = 5\n").unwrap();
        assert_eq!(config.session.barge_in_min_chars, 5);
        assert_eq!(config.session.inactivity_timeout_secs, 30);
    }
}
