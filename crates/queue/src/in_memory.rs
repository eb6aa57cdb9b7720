//! In-memory dispatch queue for tests/dev and single-process deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::event::QueueEvent;
use crate::message::{Delivery, DeliveryId, DispatchMessage};
use crate::queue::{DispatchQueue, QueueError, QueueStats};
use crate::retry::RetryPolicy;
use crate::subscription::Subscription;

const EVENT_CAPACITY: usize = 1024;

/// In-memory queue.
///
/// - FIFO hand-out over an unbounded channel
/// - retries are re-queued by a timer task after the policy's backoff
/// - nothing survives a restart
#[derive(Debug, Clone)]
pub struct InMemoryDispatchQueue {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    policy: RetryPolicy,
    sender: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>,
    in_flight: Mutex<HashMap<DeliveryId, Delivery>>,
    next_id: AtomicU64,
    counts: Counters,
    events: broadcast::Sender<QueueEvent>,
    exhausted: Mutex<Vec<mpsc::UnboundedSender<QueueEvent>>>,
}

#[derive(Debug, Default)]
struct Counters {
    waiting: AtomicU64,
    active: AtomicU64,
    delayed: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryDispatchQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                policy,
                sender: Mutex::new(Some(tx)),
                receiver: tokio::sync::Mutex::new(rx),
                in_flight: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                counts: Counters::default(),
                events,
                exhausted: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    /// Stop accepting messages. Consumers drain what is already waiting and
    /// then observe [`QueueError::Closed`]. Pending retries are dropped and
    /// reported as [`QueueEvent::Exhausted`] when their backoff ends.
    pub fn close(&self) {
        lock(&self.inner.sender).take();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner.sender).is_none()
    }
}

impl Default for InMemoryDispatchQueue {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl Inner {
    fn next_id(&self) -> DeliveryId {
        DeliveryId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn push(&self, delivery: Delivery) -> Result<(), QueueError> {
        let sender = lock(&self.sender);
        let tx = sender.as_ref().ok_or(QueueError::Closed)?;
        self.counts.waiting.fetch_add(1, Ordering::SeqCst);
        if tx.send(delivery).is_err() {
            self.counts.waiting.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    fn take_in_flight(&self, id: DeliveryId) -> Result<Delivery, QueueError> {
        let delivery = lock(&self.in_flight)
            .remove(&id)
            .ok_or(QueueError::UnknownDelivery(id))?;
        self.counts.active.fetch_sub(1, Ordering::SeqCst);
        Ok(delivery)
    }

    fn publish(&self, event: QueueEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    /// Give up on `message` after retryable failures. Counted once, sent to
    /// the broadcast feed and to every live exhausted-only subscriber.
    fn exhaust(&self, message: DispatchMessage, attempts: u32, error: String) {
        self.counts.failed.fetch_add(1, Ordering::SeqCst);
        let event = QueueEvent::Exhausted { message, attempts, error };
        lock(&self.exhausted).retain(|tx| tx.send(event.clone()).is_ok());
        self.publish(event);
    }
}

#[async_trait]
impl DispatchQueue for InMemoryDispatchQueue {
    async fn enqueue(&self, message: DispatchMessage) -> Result<(), QueueError> {
        let delivery = Delivery {
            id: self.inner.next_id(),
            message,
            attempt: 1,
            max_attempts: self.inner.policy.max_attempts.max(1),
        };
        debug!(
            request_id = %delivery.message.request_id,
            vendor = %delivery.message.vendor,
            delivery_id = %delivery.id,
            "message enqueued"
        );
        self.inner.push(delivery)
    }

    async fn next_delivery(&self) -> Result<Delivery, QueueError> {
        let mut rx = self.inner.receiver.lock().await;
        let delivery = rx.recv().await.ok_or(QueueError::Closed)?;
        drop(rx);

        self.inner.counts.waiting.fetch_sub(1, Ordering::SeqCst);
        self.inner.counts.active.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.in_flight).insert(delivery.id, delivery.clone());
        Ok(delivery)
    }

    async fn ack(&self, id: DeliveryId) -> Result<(), QueueError> {
        let delivery = self.inner.take_in_flight(id)?;
        self.inner.counts.completed.fetch_add(1, Ordering::SeqCst);
        self.inner.publish(QueueEvent::Completed {
            message: delivery.message,
            attempt: delivery.attempt,
        });
        Ok(())
    }

    async fn nack(&self, id: DeliveryId, error: String, retryable: bool) -> Result<(), QueueError> {
        let delivery = self.inner.take_in_flight(id)?;
        let will_retry = retryable && delivery.attempt < delivery.max_attempts;

        self.inner.publish(QueueEvent::Failed {
            message: delivery.message.clone(),
            attempt: delivery.attempt,
            error: error.clone(),
            will_retry,
        });

        if will_retry {
            let delay = self.inner.policy.delay_for_attempt(delivery.attempt);
            info!(
                request_id = %delivery.message.request_id,
                attempt = delivery.attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "delivery failed, retry scheduled"
            );

            let retry = Delivery {
                id: self.inner.next_id(),
                message: delivery.message,
                attempt: delivery.attempt + 1,
                max_attempts: delivery.max_attempts,
            };
            let inner = self.inner.clone();
            inner.counts.delayed.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                inner.counts.delayed.fetch_sub(1, Ordering::SeqCst);
                let message = retry.message.clone();
                let attempts = retry.attempt - 1;
                if inner.push(retry).is_err() {
                    warn!(
                        request_id = %message.request_id,
                        attempts,
                        "queue closed, retry dropped"
                    );
                    inner.exhaust(message, attempts, error);
                }
            });
            return Ok(());
        }

        if retryable {
            warn!(
                request_id = %delivery.message.request_id,
                attempts = delivery.attempt,
                error = %error,
                "delivery attempts exhausted"
            );
            self.inner.exhaust(delivery.message, delivery.attempt, error);
        } else {
            self.inner.counts.failed.fetch_add(1, Ordering::SeqCst);
            debug!(
                request_id = %delivery.message.request_id,
                error = %error,
                "delivery discarded"
            );
        }
        Ok(())
    }

    fn subscribe(&self) -> Subscription<QueueEvent> {
        Subscription::new(self.inner.events.subscribe())
    }

    fn subscribe_exhausted(&self) -> Subscription<QueueEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.exhausted).push(tx);
        Subscription::reliable(rx)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let c = &self.inner.counts;
        Ok(QueueStats {
            waiting: c.waiting.load(Ordering::SeqCst),
            active: c.active.load(Ordering::SeqCst),
            delayed: c.delayed.load(Ordering::SeqCst),
            completed: c.completed.load(Ordering::SeqCst),
            failed: c.failed.load(Ordering::SeqCst),
        })
    }
}
