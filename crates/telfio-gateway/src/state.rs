// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared state and error mapping for gateway handlers.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::sync::broadcast;

use telfio_config::RuntimeSettings;
use telfio_core::events::LifecycleEvent;
use telfio_core::{CallStore, TelfioError};
use telfio_dialer::{CampaignRunner, Dialer};
use telfio_session::SessionRegistry;
use telfio_webhook::WebhookDispatcher;

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CallStore>,
    pub registry: Arc<SessionRegistry>,
    pub dialer: Arc<Dialer>,
    pub campaigns: Arc<CampaignRunner>,
    pub webhooks: Arc<WebhookDispatcher>,
    pub settings: RuntimeSettings,
    pub bus: broadcast::Sender<LifecycleEvent>,
    /// Grace window for a media WebSocket to bind to a session.
    pub bind_grace: Duration,
    /// Unrecognized frames seen on media WebSockets.
    pub unknown_frames: Arc<AtomicU64>,
    pub started_at: std::time::Instant,
}

/// JSON error response mapped from the engine's error kinds.
pub struct ApiError(pub TelfioError);

impl From<TelfioError> for ApiError {
    fn from(e: TelfioError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TelfioError::Invalid(_) => StatusCode::BAD_REQUEST,
            TelfioError::NotFound(_) => StatusCode::NOT_FOUND,
            TelfioError::Conflict(_) | TelfioError::AdmissionDenied(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = axum::Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_status_codes() {
        let cases = [
            (TelfioError::Invalid("x".into()), StatusCode::BAD_REQUEST),
            (TelfioError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (TelfioError::Conflict("x".into()), StatusCode::CONFLICT),
            (TelfioError::AdmissionDenied("x".into()), StatusCode::CONFLICT),
            (TelfioError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            let response = ApiError(error).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
