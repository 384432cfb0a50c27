// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query modules. Each accepts `&Database` and runs through the single
//! writer connection.

pub mod calls;
pub mod campaigns;
pub mod prompts;
pub mod schedules;
pub mod settings;
pub mod webhooks;
