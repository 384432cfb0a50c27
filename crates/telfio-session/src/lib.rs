// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The call session engine: per-call FSM, session registry, and the
//! greeting audio cache.

pub mod greeting;
pub mod registry;
pub mod session;

pub use greeting::GreetingCache;
pub use registry::{AdmissionLimits, SessionHandle, SessionRegistry};
pub use session::{
    CallSession, SessionCommand, SessionContext, SessionTimings, SwitchLink, SwitchPorts,
    switch_link,
};
