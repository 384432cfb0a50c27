// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Campaign endpoints: CRUD, start/pause, contact import.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;

use telfio_core::TelfioError;
use telfio_core::traits::{CampaignRow, ContactRow, NewCampaign};
use telfio_dialer::parse_contacts;

use crate::state::{ApiResult, AppState};

pub async fn create(
    State(state): State<AppState>,
    Json(campaign): Json<NewCampaign>,
) -> ApiResult<(StatusCode, Json<CampaignRow>)> {
    if campaign.name.trim().is_empty() {
        return Err(TelfioError::Invalid("campaign name must not be empty".into()).into());
    }
    if !(1..=50).contains(&campaign.max_concurrent) {
        return Err(TelfioError::Invalid(
            "max_concurrent must be within 1..=50".into(),
        )
        .into());
    }
    if let Some(prompt_id) = campaign.prompt_id
        && state.store.get_prompt(prompt_id).await?.is_none()
    {
        return Err(TelfioError::NotFound(format!("prompt {prompt_id}")).into());
    }

    let created = state.store.create_campaign(&campaign).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<CampaignRow>>> {
    Ok(Json(state.store.list_campaigns().await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let campaign = state
        .store
        .get_campaign(id)
        .await?
        .ok_or_else(|| TelfioError::NotFound(format!("campaign {id}")))?;
    let counts = state.store.campaign_counts(id).await?;
    Ok(Json(serde_json::json!({
        "campaign": campaign,
        "contacts": counts,
    })))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    if state.campaigns.is_running(id) {
        return Err(TelfioError::Conflict(format!(
            "campaign {id} is running; pause it first"
        ))
        .into());
    }
    if !state.store.delete_campaign(id).await? {
        return Err(TelfioError::NotFound(format!("campaign {id}")).into());
    }
    Ok(StatusCode::OK)
}

pub async fn start(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    state.campaigns.start(id).await?;
    Ok(Json(serde_json::json!({ "campaign_id": id, "status": "running" })))
}

pub async fn pause(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    state.campaigns.pause(id).await?;
    Ok(Json(serde_json::json!({ "campaign_id": id, "status": "paused" })))
}

pub async fn contacts(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<ContactRow>>> {
    if state.store.get_campaign(id).await?.is_none() {
        return Err(TelfioError::NotFound(format!("campaign {id}")).into());
    }
    Ok(Json(state.store.list_contacts(id).await?))
}

/// Imports a CSV body. In-campaign duplicates are skipped and reported.
pub async fn import_contacts(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: String,
) -> ApiResult<Json<serde_json::Value>> {
    if state.store.get_campaign(id).await?.is_none() {
        return Err(TelfioError::NotFound(format!("campaign {id}")).into());
    }
    let contacts = parse_contacts(&body)?;
    if contacts.is_empty() {
        return Err(TelfioError::Invalid("CSV contains no importable contacts".into()).into());
    }
    let summary = state.store.add_contacts(id, &contacts).await?;
    Ok(Json(serde_json::json!({
        "imported": summary.imported,
        "duplicates": summary.duplicates,
    })))
}
