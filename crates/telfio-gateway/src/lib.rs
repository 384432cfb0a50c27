// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP/WebSocket gateway: the switch media endpoint, the operator control
//! API, and the dashboard stream.

pub mod dashboard;
pub mod handlers;
pub mod media;
pub mod server;
pub mod state;

pub use server::{router, serve_on, start_server};
pub use state::{ApiError, ApiResult, AppState};
