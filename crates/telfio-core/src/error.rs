// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Telfio voice agent.

use thiserror::Error;

/// The primary error type used across all Telfio adapter traits and core operations.
#[derive(Debug, Error)]
pub enum TelfioError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Provider errors (STT/LLM/TTS connection failure, API error, stream abort).
    #[error("provider error: {message}")]
    Provider {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Switch control channel errors (origination rejected, command failure).
    #[error("switch error: {0}")]
    Switch(String),

    /// Session lifecycle errors (bad transition, teardown failure).
    #[error("session error: {0}")]
    Session(String),

    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation conflicts with the current state (duplicate call_id,
    /// pausing a non-running campaign, cancelling a non-pending schedule).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Admission denied by the registry (global or campaign cap reached).
    #[error("admission denied: {0}")]
    AdmissionDenied(String),

    /// Input failed validation.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, TelfioError>;
