// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the archivist coordinator.

use tokio::sync::broadcast;

use crate::dispatch::RecordEvent;

/// Engine lifecycle state.
///
/// Use [`super::Archivist::state()`] to check the current state or
/// [`super::Archivist::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Just created, run loop not started
    Created,
    /// Run loop active
    Running,
    /// Graceful shutdown in progress
    ShuttingDown,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

/// Record notifications for a single topic.
///
/// Wraps the engine-wide broadcast receiver and skips events for other
/// topics.
#[derive(Debug)]
pub struct TopicSubscription {
    pub(super) topic: String,
    pub(super) rx: broadcast::Receiver<RecordEvent>,
}

impl TopicSubscription {
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next event for this topic.
    ///
    /// Fails with `Lagged` when the subscriber fell behind the channel
    /// capacity, and with `Closed` once the engine is gone.
    pub async fn recv(&mut self) -> Result<RecordEvent, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if event.topic == self.topic {
                return Ok(event);
            }
        }
    }

    /// Next buffered event for this topic, without waiting.
    pub fn try_recv(&mut self) -> Result<RecordEvent, broadcast::error::TryRecvError> {
        loop {
            let event = self.rx.try_recv()?;
            if event.topic == self.topic {
                return Ok(event);
            }
        }
    }
}
