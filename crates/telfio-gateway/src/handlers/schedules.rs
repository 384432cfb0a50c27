// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scheduled call endpoints.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use telfio_core::TelfioError;
use telfio_core::traits::{NewScheduledCall, ScheduledCallRow};

use crate::state::{ApiResult, AppState};

pub async fn create(
    State(state): State<AppState>,
    Json(schedule): Json<NewScheduledCall>,
) -> ApiResult<(StatusCode, Json<ScheduledCallRow>)> {
    let digits = schedule
        .phone_number
        .chars()
        .filter(|c| c.is_ascii_digit())
        .count();
    if digits < 10 {
        return Err(TelfioError::Invalid(
            "phone_number must have at least 10 digits".into(),
        )
        .into());
    }
    if chrono::DateTime::parse_from_rfc3339(&schedule.scheduled_time).is_err() {
        return Err(TelfioError::Invalid(
            "scheduled_time must be an RFC 3339 timestamp".into(),
        )
        .into());
    }
    if let Some(prompt_id) = schedule.prompt_id
        && state.store.get_prompt(prompt_id).await?.is_none()
    {
        return Err(TelfioError::NotFound(format!("prompt {prompt_id}")).into());
    }

    let created = state.store.create_scheduled_call(&schedule).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<ScheduledCallRow>>> {
    Ok(Json(
        state
            .store
            .list_scheduled_calls(query.status.as_deref())
            .await?,
    ))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ScheduledCallRow>> {
    let schedule = state
        .store
        .get_scheduled_call(id)
        .await?
        .ok_or_else(|| TelfioError::NotFound(format!("scheduled call {id}")))?;
    Ok(Json(schedule))
}

/// Only `pending` schedules may be cancelled; anything else conflicts.
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.cancel_scheduled_call(id).await?;
    Ok(Json(serde_json::json!({ "id": id, "status": "cancelled" })))
}
