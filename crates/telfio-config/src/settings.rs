// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runtime-reloadable settings snapshot.
//!
//! File config provides the base; rows in the `settings` table override it.
//! Readers take an `Arc` of the current snapshot without holding a lock
//! across use; `reload` atomically swaps in a freshly merged view without a
//! restart. In-flight calls keep the snapshot they started with.

use std::sync::{Arc, RwLock};

use telfio_core::traits::SettingRow;
use telfio_core::{CallStore, Result};
use tracing::{info, warn};

use crate::model::TelfioConfig;

/// Settings keys recognized in the database store.
pub mod keys {
    pub const STT_API_KEY: &str = "stt_api_key";
    pub const LLM_API_KEY: &str = "llm_api_key";
    pub const TTS_API_KEY: &str = "tts_api_key";
    pub const MAX_CONCURRENT_CALLS: &str = "max_concurrent_calls";
    pub const DEFAULT_LLM_MODEL: &str = "default_llm_model";
    pub const DEFAULT_VOICE_ID: &str = "default_voice_id";
    pub const LANGUAGE: &str = "language";
    pub const BARGE_IN_MIN_CHARS: &str = "barge_in_min_chars";
}

/// Immutable merged view of file config + settings rows.
#[derive(Debug, Clone)]
pub struct SettingsSnapshot {
    pub max_concurrent_calls: usize,
    pub barge_in_min_chars: usize,
    pub default_llm_model: String,
    pub default_voice_id: String,
    pub language: String,
    pub stt_api_key: Option<String>,
    pub llm_api_key: Option<String>,
    pub tts_api_key: Option<String>,
}

impl SettingsSnapshot {
    /// Builds a snapshot from file config alone.
    pub fn from_config(config: &TelfioConfig) -> Self {
        Self {
            max_concurrent_calls: config.agent.max_concurrent_calls,
            barge_in_min_chars: config.session.barge_in_min_chars,
            default_llm_model: config.llm.default_model.clone(),
            default_voice_id: config.tts.default_voice_id.clone(),
            language: config.stt.language.clone(),
            stt_api_key: config.stt.api_key.clone(),
            llm_api_key: config.llm.api_key.clone(),
            tts_api_key: config.tts.api_key.clone(),
        }
    }

    fn apply_rows(&mut self, rows: &[SettingRow]) {
        for row in rows {
            if row.value.is_empty() {
                continue;
            }
            match row.key.as_str() {
                keys::STT_API_KEY => self.stt_api_key = Some(row.value.clone()),
                keys::LLM_API_KEY => self.llm_api_key = Some(row.value.clone()),
                keys::TTS_API_KEY => self.tts_api_key = Some(row.value.clone()),
                keys::DEFAULT_LLM_MODEL => self.default_llm_model = row.value.clone(),
                keys::DEFAULT_VOICE_ID => self.default_voice_id = row.value.clone(),
                keys::LANGUAGE => self.language = row.value.clone(),
                keys::MAX_CONCURRENT_CALLS => match row.value.parse::<usize>() {
                    Ok(n) if n > 0 => self.max_concurrent_calls = n,
                    _ => warn!(value = %row.value, "ignoring invalid max_concurrent_calls setting"),
                },
                keys::BARGE_IN_MIN_CHARS => match row.value.parse::<usize>() {
                    Ok(n) => self.barge_in_min_chars = n,
                    Err(_) => {
                        warn!(value = %row.value, "ignoring invalid barge_in_min_chars setting")
                    }
                },
                _ => {}
            }
        }
    }
}

/// Process-wide settings handle. Cheap to clone; all clones observe swaps.
#[derive(Clone)]
pub struct RuntimeSettings {
    base: Arc<TelfioConfig>,
    current: Arc<RwLock<Arc<SettingsSnapshot>>>,
}

impl RuntimeSettings {
    pub fn new(config: TelfioConfig) -> Self {
        let snapshot = Arc::new(SettingsSnapshot::from_config(&config));
        Self {
            base: Arc::new(config),
            current: Arc::new(RwLock::new(snapshot)),
        }
    }

    /// Returns the current snapshot. Readers clone the `Arc` and drop the
    /// guard immediately; a concurrent reload never blocks on them.
    pub fn current(&self) -> Arc<SettingsSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Re-reads all settings rows and atomically swaps the live view.
    pub async fn reload(&self, store: &dyn CallStore) -> Result<()> {
        let rows = store.list_settings().await?;
        let mut snapshot = SettingsSnapshot::from_config(&self.base);
        snapshot.apply_rows(&rows);

        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(snapshot);
        info!(rows = rows.len(), "settings reloaded");
        Ok(())
    }

    /// The file configuration this handle was built from.
    pub fn base(&self) -> &TelfioConfig {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: &str, value: &str) -> SettingRow {
        SettingRow {
            key: key.to_string(),
            value: value.to_string(),
            description: None,
            is_secret: false,
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn rows_override_config() {
        let config = TelfioConfig::default();
        let mut snapshot = SettingsSnapshot::from_config(&config);
        snapshot.apply_rows(&[
            row(keys::MAX_CONCURRENT_CALLS, "3"),
            row(keys::DEFAULT_VOICE_ID, "pt-BR-heitor"),
            row(keys::LLM_API_KEY, "sk-test"),
        ]);
        assert_eq!(snapshot.max_concurrent_calls, 3);
        assert_eq!(snapshot.default_voice_id, "pt-BR-heitor");
        assert_eq!(snapshot.llm_api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn invalid_numbers_are_ignored() {
        let config = TelfioConfig::default();
        let mut snapshot = SettingsSnapshot::from_config(&config);
        snapshot.apply_rows(&[row(keys::MAX_CONCURRENT_CALLS, "zero")]);
        assert_eq!(snapshot.max_concurrent_calls, 15);
    }

    #[test]
    fn empty_values_do_not_clear() {
        let mut config = TelfioConfig::default();
        config.llm.api_key = Some("from-file".into());
        let mut snapshot = SettingsSnapshot::from_config(&config);
        snapshot.apply_rows(&[row(keys::LLM_API_KEY, "")]);
        assert_eq!(snapshot.llm_api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn handle_swaps_are_visible_to_clones() {
        let settings = RuntimeSettings::new(TelfioConfig::default());
        let other = settings.clone();
        {
            let mut guard = settings.current.write().unwrap();
            let mut next = (**guard).clone();
            next.max_concurrent_calls = 1;
            *guard = Arc::new(next);
        }
        assert_eq!(other.current().max_concurrent_calls, 1);
    }
}
