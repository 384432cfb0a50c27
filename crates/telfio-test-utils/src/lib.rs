// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic mocks for Telfio tests: provider adapters driven by
//! scripts, a recording switch, and an in-memory persistence gateway.

pub mod memory_store;
pub mod mock_providers;
pub mod mock_switch;

pub use memory_store::MemoryStore;
pub use mock_providers::{MockLlm, MockStt, MockTts};
pub use mock_switch::{MockSwitch, SwitchCommand};

use telfio_core::LifecycleEvent;
use tokio::sync::broadcast;

/// Collects lifecycle events from a broadcast bus for later assertions.
pub struct EventCollector {
    rx: broadcast::Receiver<LifecycleEvent>,
}

impl EventCollector {
    pub fn subscribe(bus: &broadcast::Sender<LifecycleEvent>) -> Self {
        Self { rx: bus.subscribe() }
    }

    /// Drains everything currently buffered.
    pub fn drain(&mut self) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Waits up to `timeout` for an event matching the predicate, draining
    /// (and returning) everything seen on the way.
    pub async fn wait_for(
        &mut self,
        timeout: std::time::Duration,
        mut predicate: impl FnMut(&LifecycleEvent) -> bool,
    ) -> Vec<LifecycleEvent> {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let event = tokio::select! {
                event = self.rx.recv() => match event {
                    Ok(event) => event,
                    Err(_) => break,
                },
                _ = tokio::time::sleep_until(deadline) => break,
            };
            let matched = predicate(&event);
            seen.push(event);
            if matched {
                break;
            }
        }
        seen
    }
}
