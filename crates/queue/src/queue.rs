//! Dispatch queue contract.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::event::QueueEvent;
use crate::message::{Delivery, DeliveryId, DispatchMessage};
use crate::subscription::Subscription;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,
    #[error("unknown delivery: {0}")]
    UnknownDelivery(DeliveryId),
}

/// Point-in-time counts, in the shape of the `/metrics` queue section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Ready to be delivered.
    pub waiting: u64,
    /// Handed to a consumer and not yet settled.
    pub active: u64,
    /// Waiting out a retry backoff.
    pub delayed: u64,
    pub completed: u64,
    /// Messages that were given up on (discarded or exhausted).
    pub failed: u64,
}

/// At-least-once work queue for dispatch messages.
///
/// ## Settlement
///
/// Every delivery must be settled exactly once:
/// - `ack`: processing finished (whatever the job's outcome was)
/// - `nack(retryable = true)`: transient failure, redeliver after backoff until
///   the attempt budget is spent, then publish [`QueueEvent::Exhausted`]
/// - `nack(retryable = false)`: give up on the message now
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    async fn enqueue(&self, message: DispatchMessage) -> Result<(), QueueError>;

    /// Wait for the next delivery. Returns [`QueueError::Closed`] once the queue
    /// is closed and drained.
    async fn next_delivery(&self) -> Result<Delivery, QueueError>;

    async fn ack(&self, id: DeliveryId) -> Result<(), QueueError>;

    async fn nack(&self, id: DeliveryId, error: String, retryable: bool) -> Result<(), QueueError>;

    /// Best-effort feed of every event; slow readers may lag and miss some.
    fn subscribe(&self) -> Subscription<QueueEvent>;

    /// Lossless feed of [`QueueEvent::Exhausted`] only. Every message the queue
    /// gives up on after retryable failures is delivered here, including
    /// retries dropped because the queue closed during their backoff.
    fn subscribe_exhausted(&self) -> Subscription<QueueEvent>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;
}

#[async_trait]
impl<Q> DispatchQueue for Arc<Q>
where
    Q: DispatchQueue + ?Sized,
{
    async fn enqueue(&self, message: DispatchMessage) -> Result<(), QueueError> {
        (**self).enqueue(message).await
    }

    async fn next_delivery(&self) -> Result<Delivery, QueueError> {
        (**self).next_delivery().await
    }

    async fn ack(&self, id: DeliveryId) -> Result<(), QueueError> {
        (**self).ack(id).await
    }

    async fn nack(&self, id: DeliveryId, error: String, retryable: bool) -> Result<(), QueueError> {
        (**self).nack(id, error, retryable).await
    }

    fn subscribe(&self) -> Subscription<QueueEvent> {
        (**self).subscribe()
    }

    fn subscribe_exhausted(&self) -> Subscription<QueueEvent> {
        (**self).subscribe_exhausted()
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        (**self).stats().await
    }
}
