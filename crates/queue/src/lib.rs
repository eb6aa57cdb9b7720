//! Dispatch queue contract and an in-memory implementation.
//!
//! The queue hands each [`DispatchMessage`] to a consumer as a [`Delivery`]
//! (one attempt). Consumers settle every delivery with `ack` or `nack`; retry
//! scheduling and backoff belong to the queue, never to the consumer.
//!
//! Delivery is **at-least-once**: a message may be handed out more than once,
//! so consumers must be idempotent.

pub mod event;
pub mod in_memory;
pub mod message;
pub mod queue;
pub mod retry;
pub mod subscription;

pub use event::QueueEvent;
pub use in_memory::InMemoryDispatchQueue;
pub use message::{Delivery, DeliveryId, DispatchMessage};
pub use queue::{DispatchQueue, QueueError, QueueStats};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use subscription::{Subscription, SubscriptionError};
