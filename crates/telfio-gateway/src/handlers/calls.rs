// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Call endpoints: dial, hangup, active snapshot, history, detail, delete.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use telfio_core::TelfioError;

use crate::state::{ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct DialRequest {
    pub number: String,
    #[serde(default)]
    pub prompt_id: Option<i64>,
}

pub async fn dial(
    State(state): State<AppState>,
    Json(request): Json<DialRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let digits = request.number.chars().filter(|c| c.is_ascii_digit()).count();
    if digits < 10 {
        return Err(TelfioError::Invalid(
            "number must have at least 10 digits".to_string(),
        )
        .into());
    }

    let call_id = state
        .dialer
        .dial(&request.number, request.prompt_id, None)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "call_id": call_id })),
    ))
}

pub async fn hangup(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.dialer.hangup(&call_id).await?;
    Ok(Json(serde_json::json!({ "call_id": call_id, "status": "hanging_up" })))
}

pub async fn active(State(state): State<AppState>) -> Json<serde_json::Value> {
    let sessions = state.registry.snapshot();
    Json(serde_json::json!({
        "count": sessions.len(),
        "calls": sessions,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default)]
    pub status: Option<String>,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let per_page = query.per_page.min(100);
    let (calls, total) = state
        .store
        .list_calls(query.page, per_page, query.status.as_deref())
        .await?;
    Ok(Json(serde_json::json!({
        "calls": calls,
        "total": total,
        "page": query.page,
        "per_page": per_page,
    })))
}

pub async fn get(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let call = state
        .store
        .get_call(&call_id)
        .await?
        .ok_or_else(|| TelfioError::NotFound(format!("call {call_id}")))?;
    let messages = state.store.get_messages(&call_id).await?;
    Ok(Json(serde_json::json!({
        "call": call,
        "transcript": messages,
    })))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.registry.get(&call_id).is_some() {
        return Err(TelfioError::Conflict(format!(
            "call {call_id} is live; hang it up first"
        ))
        .into());
    }
    let deleted = state.store.delete_call(&call_id).await?;
    if !deleted {
        return Err(TelfioError::NotFound(format!("call {call_id}")).into());
    }
    Ok(StatusCode::OK)
}
