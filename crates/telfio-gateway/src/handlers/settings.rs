// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Settings endpoints. Secret values are masked in responses; writes
//! reload the live settings snapshot so no restart is needed.

use axum::Json;
use axum::extract::State;
use serde::Deserialize;

use telfio_core::TelfioError;
use telfio_core::traits::SettingRow;

use crate::state::{ApiResult, AppState};

/// Masks a secret value, keeping the last four characters.
fn mask_value(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    let chars: Vec<char> = value.chars().collect();
    if chars.len() > 4 {
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}{tail}", "*".repeat(16))
    } else {
        "****".to_string()
    }
}

fn present(row: SettingRow) -> serde_json::Value {
    let is_configured = !row.value.is_empty();
    let value = if row.is_secret {
        mask_value(&row.value)
    } else {
        row.value
    };
    serde_json::json!({
        "key": row.key,
        "value": value,
        "description": row.description,
        "is_secret": row.is_secret,
        "is_configured": is_configured,
        "updated_at": row.updated_at,
    })
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let rows = state.store.list_settings().await?;
    let settings: Vec<serde_json::Value> = rows.into_iter().map(present).collect();
    Ok(Json(serde_json::json!({ "settings": settings })))
}

#[derive(Debug, Deserialize)]
pub struct SetRequest {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_secret")]
    pub is_secret: bool,
}

fn default_secret() -> bool {
    true
}

pub async fn set(
    State(state): State<AppState>,
    Json(request): Json<SetRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if request.key.trim().is_empty() {
        return Err(TelfioError::Invalid("setting key must not be empty".into()).into());
    }
    state
        .store
        .set_setting(
            &request.key,
            &request.value,
            request.description.as_deref(),
            request.is_secret,
        )
        .await?;
    // Writes take effect immediately for new calls.
    state.settings.reload(state.store.as_ref()).await?;
    Ok(Json(serde_json::json!({ "key": request.key, "saved": true })))
}

/// Re-reads all settings rows and swaps the live view.
pub async fn reload(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    state.settings.reload(state.store.as_ref()).await?;
    Ok(Json(serde_json::json!({ "reloaded": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masking_keeps_last_four() {
        assert_eq!(mask_value("sk-abcdef123456"), "****************3456");
        assert_eq!(mask_value("abc"), "****");
        assert_eq!(mask_value(""), "");
    }
}
