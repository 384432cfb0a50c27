// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prompt CRUD and activation.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;

use telfio_core::TelfioError;
use telfio_core::traits::{NewPrompt, PromptRow};

use crate::state::{ApiResult, AppState};

fn validate(prompt: &NewPrompt) -> Result<(), TelfioError> {
    if prompt.name.trim().is_empty() {
        return Err(TelfioError::Invalid("prompt name must not be empty".into()));
    }
    if prompt.system_prompt.trim().is_empty() {
        return Err(TelfioError::Invalid("system_prompt must not be empty".into()));
    }
    if !(0.0..=2.0).contains(&prompt.temperature) {
        return Err(TelfioError::Invalid(
            "temperature must be within 0.0..=2.0".into(),
        ));
    }
    Ok(())
}

pub async fn create(
    State(state): State<AppState>,
    Json(prompt): Json<NewPrompt>,
) -> ApiResult<(StatusCode, Json<PromptRow>)> {
    validate(&prompt)?;
    let created = state.store.create_prompt(&prompt).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<PromptRow>>> {
    Ok(Json(state.store.list_prompts().await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<PromptRow>> {
    let prompt = state
        .store
        .get_prompt(id)
        .await?
        .ok_or_else(|| TelfioError::NotFound(format!("prompt {id}")))?;
    Ok(Json(prompt))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(prompt): Json<NewPrompt>,
) -> ApiResult<Json<PromptRow>> {
    validate(&prompt)?;
    let updated = state
        .store
        .update_prompt(id, &prompt)
        .await?
        .ok_or_else(|| TelfioError::NotFound(format!("prompt {id}")))?;
    Ok(Json(updated))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    if !state.store.delete_prompt(id).await? {
        return Err(TelfioError::NotFound(format!("prompt {id}")).into());
    }
    Ok(StatusCode::OK)
}

/// Atomic swap: exactly one prompt is active afterwards.
pub async fn activate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.activate_prompt(id).await?;
    Ok(Json(serde_json::json!({ "activated": id })))
}
