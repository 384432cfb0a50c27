// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde
//! attributes. Collects all errors instead of failing fast so operators see
//! every problem at once.

use crate::model::TelfioConfig;

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns all collected validation error messages; empty means valid.
pub fn validate_config(config: &TelfioConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if config.agent.max_concurrent_calls == 0 {
        errors.push("agent.max_concurrent_calls must be at least 1".to_string());
    }

    if config.gateway.host.trim().is_empty() {
        errors.push("gateway.host must not be empty".to_string());
    }

    if !config.gateway.media_ws_base.starts_with("ws://")
        && !config.gateway.media_ws_base.starts_with("wss://")
    {
        errors.push(format!(
            "gateway.media_ws_base `{}` must be a ws:// or wss:// URL",
            config.gateway.media_ws_base
        ));
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push("storage.database_path must not be empty".to_string());
    }

    if !config.stt.base_url.starts_with("ws://") && !config.stt.base_url.starts_with("wss://") {
        errors.push(format!(
            "stt.base_url `{}` must be a ws:// or wss:// URL",
            config.stt.base_url
        ));
    }

    for (section, url) in [("llm", &config.llm.base_url), ("tts", &config.tts.base_url)] {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            errors.push(format!("{section}.base_url `{url}` must be an http(s) URL"));
        }
    }

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        errors.push(format!(
            "llm.temperature must be within 0.0..=2.0, got {}",
            config.llm.temperature
        ));
    }

    if config.session.tts_first_frame_warn_secs > config.session.tts_first_frame_timeout_secs {
        errors.push(
            "session.tts_first_frame_warn_secs must not exceed tts_first_frame_timeout_secs"
                .to_string(),
        );
    }

    errors
}

/// API keys that must be present (via config, env, or a settings row)
/// before the engine can place calls. Returns the missing key names.
pub fn missing_provider_keys(config: &TelfioConfig) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if config.stt.api_key.is_none() {
        missing.push("stt.api_key");
    }
    if config.llm.api_key.is_none() {
        missing.push("llm.api_key");
    }
    if config.tts.api_key.is_none() {
        missing.push("tts.api_key");
    }
    missing
}
