// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./telfio.toml` > `~/.config/telfio/telfio.toml` > `/etc/telfio/telfio.toml`
//! with environment variable overrides via `TELFIO_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::TelfioConfig;

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/telfio/telfio.toml` (system-wide)
/// 3. `~/.config/telfio/telfio.toml` (user XDG config)
/// 4. `./telfio.toml` (local directory)
/// 5. `TELFIO_*` environment variables
pub fn load_config() -> Result<TelfioConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(TelfioConfig::default()))
        .merge(Toml::file("/etc/telfio/telfio.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("telfio/telfio.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("telfio.toml"))
        .merge(env_provider())
        .extract()
}

/// Load configuration from a TOML string only (no XDG lookup).
///
/// Used for testing and explicit config specification.
pub fn load_config_from_str(toml_content: &str) -> Result<TelfioConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(TelfioConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<TelfioConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(TelfioConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Create the environment variable provider using explicit `map()` for section-to-dot mapping.
///
/// Uses `Env::map()` NOT `Env::split("_")` to avoid ambiguity with
/// underscore-containing key names: `TELFIO_LLM_API_KEY` must map to
/// `llm.api_key`, not `llm.api.key`.
fn env_provider() -> Env {
    Env::prefixed("TELFIO_").map(|key| {
        // `key` is the lowercased env var name with prefix stripped.
        // Example: TELFIO_LLM_API_KEY -> "llm_api_key"
        let key_str = key.as_str();
        let mapped = key_str
            .replacen("agent_", "agent.", 1)
            .replacen("gateway_", "gateway.", 1)
            .replacen("switch_", "switch.", 1)
            .replacen("stt_", "stt.", 1)
            .replacen("llm_", "llm.", 1)
            .replacen("tts_", "tts.", 1)
            .replacen("storage_", "storage.", 1)
            .replacen("session_", "session.", 1);
        mapped.into()
    })
}
