// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Signed, retried webhook delivery of lifecycle events.

pub mod dispatcher;
pub mod signature;

pub use dispatcher::{RetryPolicy, WebhookDispatcher};
pub use signature::{sign_body, verify_signature, EVENT_HEADER, SIGNATURE_HEADER};
