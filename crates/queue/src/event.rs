//! Lifecycle events published by a dispatch queue.

use serde::{Deserialize, Serialize};

use crate::message::DispatchMessage;

/// Settlement of a delivery, broadcast to every [`Subscription`](crate::Subscription).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    /// The consumer acknowledged the delivery.
    Completed {
        message: DispatchMessage,
        attempt: u32,
    },
    /// One attempt failed. Emitted for every failed attempt.
    Failed {
        message: DispatchMessage,
        attempt: u32,
        error: String,
        will_retry: bool,
    },
    /// A retryable failure happened on the last allowed attempt.
    Exhausted {
        message: DispatchMessage,
        attempts: u32,
        error: String,
    },
}

impl QueueEvent {
    pub fn message(&self) -> &DispatchMessage {
        match self {
            QueueEvent::Completed { message, .. }
            | QueueEvent::Failed { message, .. }
            | QueueEvent::Exhausted { message, .. } => message,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            QueueEvent::Completed { .. } => "completed",
            QueueEvent::Failed { .. } => "failed",
            QueueEvent::Exhausted { .. } => "exhausted",
        }
    }
}
