// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Webhook configuration endpoints.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use telfio_core::TelfioError;
use telfio_core::events::EventKind;
use telfio_core::traits::{NewWebhookConfig, WebhookConfigRow, WebhookLogRow};

use crate::state::{ApiResult, AppState};

fn validate(config: &NewWebhookConfig) -> Result<(), TelfioError> {
    if !config.url.starts_with("http://") && !config.url.starts_with("https://") {
        return Err(TelfioError::Invalid("url must be http(s)".into()));
    }
    if config.events.is_empty() {
        return Err(TelfioError::Invalid("subscribe to at least one event".into()));
    }
    for event in &config.events {
        if EventKind::from_wire(event).is_none() {
            return Err(TelfioError::Invalid(format!("unknown event `{event}`")));
        }
    }
    Ok(())
}

pub async fn create(
    State(state): State<AppState>,
    Json(config): Json<NewWebhookConfig>,
) -> ApiResult<(StatusCode, Json<WebhookConfigRow>)> {
    validate(&config)?;
    let created = state.store.create_webhook(&config).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<WebhookConfigRow>>> {
    Ok(Json(state.store.list_webhooks().await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<WebhookConfigRow>> {
    let config = state
        .store
        .get_webhook(id)
        .await?
        .ok_or_else(|| TelfioError::NotFound(format!("webhook {id}")))?;
    Ok(Json(config))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(config): Json<NewWebhookConfig>,
) -> ApiResult<Json<WebhookConfigRow>> {
    validate(&config)?;
    let updated = state
        .store
        .update_webhook(id, &config)
        .await?
        .ok_or_else(|| TelfioError::NotFound(format!("webhook {id}")))?;
    Ok(Json(updated))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    if !state.store.delete_webhook(id).await? {
        return Err(TelfioError::NotFound(format!("webhook {id}")).into());
    }
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn logs(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<Vec<WebhookLogRow>>> {
    if state.store.get_webhook(id).await?.is_none() {
        return Err(TelfioError::NotFound(format!("webhook {id}")).into());
    }
    Ok(Json(
        state.store.list_webhook_logs(id, query.limit.clamp(1, 500)).await?,
    ))
}

/// Fires a synthetic test event at the endpoint and reports the result.
pub async fn test(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(state.webhooks.send_test(id).await?))
}
