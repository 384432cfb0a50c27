// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for the Telfio voice agent: TOML model, layered loader,
//! semantic validation, and the runtime-reloadable settings snapshot.

pub mod loader;
pub mod model;
pub mod settings;
pub mod validation;

pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::TelfioConfig;
pub use settings::{RuntimeSettings, SettingsSnapshot};
pub use validation::{missing_provider_keys, validate_config};
