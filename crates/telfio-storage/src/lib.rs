// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence for the Telfio voice agent.
//!
//! A single tokio-rusqlite connection serializes all writes; embedded
//! refinery migrations run on open. [`SqliteStore`] implements the
//! [`telfio_core::CallStore`] gateway the engine consumes.

pub mod database;
pub mod migrations;
pub mod queries;
pub mod store;

pub use database::Database;
pub use store::SqliteStore;
