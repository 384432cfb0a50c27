// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Switch control channel trait.

use async_trait::async_trait;

use crate::error::Result;

/// Out-of-band command channel to the telephony switch.
///
/// Two methods keep the switch dialect pluggable: the concrete
/// implementation (ESL, ARI, ...) lives in the dialer crate, and tests use
/// a recording mock.
#[async_trait]
pub trait SwitchControl: Send + Sync {
    /// Places an outbound call whose answer handler attaches the media
    /// stream to `/ws/{call_id}`. Returns once the switch accepted the
    /// command; actual connect is observed by the media adapter.
    async fn originate(&self, number: &str, call_id: &str) -> Result<()>;

    /// Tears down the switch leg for a call.
    async fn hangup(&self, call_id: &str) -> Result<()>;
}
