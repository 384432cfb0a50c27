// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Control API handlers. Validation and delegation only; all long-running
//! work happens in the engine components.

pub mod calls;
pub mod campaigns;
pub mod prompts;
pub mod schedules;
pub mod settings;
pub mod webhooks;

use axum::Json;
use axum::extract::State;

use crate::state::AppState;

/// Unauthenticated liveness endpoint.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "active_calls": state.registry.active_count(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}
