// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Routes: the switch media WebSocket (`/ws/{call_id}`), the dashboard
//! WebSocket (`/dashboard`), and the JSON control surface.

use axum::Router;
use axum::routing::{get, post};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use telfio_core::{Result, TelfioError};

use crate::dashboard;
use crate::handlers;
use crate::media;
use crate::state::AppState;

/// Builds the full gateway router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ws/{call_id}", get(media::media_ws_handler))
        .route("/dashboard", get(dashboard::dashboard_ws_handler))
        .route("/calls/dial", post(handlers::calls::dial))
        .route("/calls/active", get(handlers::calls::active))
        .route("/calls", get(handlers::calls::list))
        .route(
            "/calls/{call_id}",
            get(handlers::calls::get).delete(handlers::calls::delete),
        )
        .route("/calls/{call_id}/hangup", post(handlers::calls::hangup))
        .route(
            "/prompts",
            get(handlers::prompts::list).post(handlers::prompts::create),
        )
        .route(
            "/prompts/{id}",
            get(handlers::prompts::get)
                .put(handlers::prompts::update)
                .delete(handlers::prompts::delete),
        )
        .route("/prompts/{id}/activate", post(handlers::prompts::activate))
        .route(
            "/campaigns",
            get(handlers::campaigns::list).post(handlers::campaigns::create),
        )
        .route(
            "/campaigns/{id}",
            get(handlers::campaigns::get).delete(handlers::campaigns::delete),
        )
        .route("/campaigns/{id}/start", post(handlers::campaigns::start))
        .route("/campaigns/{id}/pause", post(handlers::campaigns::pause))
        .route(
            "/campaigns/{id}/contacts",
            get(handlers::campaigns::contacts).post(handlers::campaigns::import_contacts),
        )
        .route(
            "/schedules",
            get(handlers::schedules::list).post(handlers::schedules::create),
        )
        .route("/schedules/{id}", get(handlers::schedules::get))
        .route("/schedules/{id}/cancel", post(handlers::schedules::cancel))
        .route(
            "/webhooks",
            get(handlers::webhooks::list).post(handlers::webhooks::create),
        )
        .route(
            "/webhooks/{id}",
            get(handlers::webhooks::get)
                .put(handlers::webhooks::update)
                .delete(handlers::webhooks::delete),
        )
        .route("/webhooks/{id}/logs", get(handlers::webhooks::logs))
        .route("/webhooks/{id}/test", post(handlers::webhooks::test))
        .route(
            "/settings",
            get(handlers::settings::list).put(handlers::settings::set),
        )
        .route("/settings/reload", post(handlers::settings::reload))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Binds and serves until the token is cancelled.
pub async fn start_server(
    host: &str,
    port: u16,
    state: AppState,
    cancel: CancellationToken,
) -> Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| TelfioError::Internal(format!("failed to bind gateway to {addr}: {e}")))?;
    info!("gateway listening on {addr}");
    serve_on(listener, state, cancel).await
}

/// Serves on an existing listener (tests bind an ephemeral port).
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    state: AppState,
    cancel: CancellationToken,
) -> Result<()> {
    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| TelfioError::Internal(format!("gateway server error: {e}")))?;
    Ok(())
}
