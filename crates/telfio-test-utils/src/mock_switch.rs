// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recording mock of the switch control channel.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use telfio_core::{Result, SwitchControl, TelfioError};

/// One recorded switch command.
#[derive(Debug, Clone, PartialEq)]
pub enum SwitchCommand {
    Originate { number: String, call_id: String },
    Hangup { call_id: String },
}

/// Records originate/hangup commands; optionally fails originations to
/// exercise retry paths.
pub struct MockSwitch {
    commands: Mutex<Vec<SwitchCommand>>,
    /// Numbers whose origination is rejected.
    reject_numbers: Mutex<Vec<String>>,
}

impl MockSwitch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            commands: Mutex::new(Vec::new()),
            reject_numbers: Mutex::new(Vec::new()),
        })
    }

    pub async fn reject_number(&self, number: &str) {
        self.reject_numbers.lock().await.push(number.to_string());
    }

    pub async fn commands(&self) -> Vec<SwitchCommand> {
        self.commands.lock().await.clone()
    }

    pub async fn originated_call_ids(&self) -> Vec<String> {
        self.commands
            .lock()
            .await
            .iter()
            .filter_map(|c| match c {
                SwitchCommand::Originate { call_id, .. } => Some(call_id.clone()),
                SwitchCommand::Hangup { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl SwitchControl for MockSwitch {
    async fn originate(&self, number: &str, call_id: &str) -> Result<()> {
        self.commands.lock().await.push(SwitchCommand::Originate {
            number: number.to_string(),
            call_id: call_id.to_string(),
        });
        if self.reject_numbers.lock().await.iter().any(|n| n == number) {
            return Err(TelfioError::Switch(format!("origination rejected for {number}")));
        }
        Ok(())
    }

    async fn hangup(&self, call_id: &str) -> Result<()> {
        self.commands.lock().await.push(SwitchCommand::Hangup {
            call_id: call_id.to_string(),
        });
        Ok(())
    }
}
