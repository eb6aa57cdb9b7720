//! Typed subscription to queue events.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// The publisher is gone; no further messages will arrive.
    #[error("subscription closed")]
    Closed,
    /// The subscriber fell behind and `0` messages were dropped for it.
    #[error("subscription lagged, {0} messages skipped")]
    Lagged(u64),
    #[error("no message available")]
    Empty,
}

/// A subscription to a stream of queue messages.
///
/// Every subscription receives its own copy of each message published after it
/// was created. Subscriptions built with [`Subscription::new`] are best-effort:
/// a subscriber that falls behind the channel capacity is told how many
/// messages it missed and then continues with the oldest retained one.
/// Subscriptions built with [`Subscription::reliable`] buffer without bound
/// and never report [`SubscriptionError::Lagged`].
#[derive(Debug)]
pub struct Subscription<M> {
    source: Source<M>,
}

#[derive(Debug)]
enum Source<M> {
    Broadcast(broadcast::Receiver<M>),
    Reliable(mpsc::UnboundedReceiver<M>),
}

impl<M: Clone> Subscription<M> {
    pub fn new(receiver: broadcast::Receiver<M>) -> Self {
        Self { source: Source::Broadcast(receiver) }
    }

    pub fn reliable(receiver: mpsc::UnboundedReceiver<M>) -> Self {
        Self { source: Source::Reliable(receiver) }
    }

    /// Wait for the next message.
    pub async fn recv(&mut self) -> Result<M, SubscriptionError> {
        match &mut self.source {
            Source::Broadcast(rx) => rx.recv().await.map_err(|err| match err {
                broadcast::error::RecvError::Closed => SubscriptionError::Closed,
                broadcast::error::RecvError::Lagged(n) => SubscriptionError::Lagged(n),
            }),
            Source::Reliable(rx) => rx.recv().await.ok_or(SubscriptionError::Closed),
        }
    }

    /// Receive without waiting.
    pub fn try_recv(&mut self) -> Result<M, SubscriptionError> {
        match &mut self.source {
            Source::Broadcast(rx) => rx.try_recv().map_err(|err| match err {
                broadcast::error::TryRecvError::Empty => SubscriptionError::Empty,
                broadcast::error::TryRecvError::Closed => SubscriptionError::Closed,
                broadcast::error::TryRecvError::Lagged(n) => SubscriptionError::Lagged(n),
            }),
            Source::Reliable(rx) => rx.try_recv().map_err(|err| match err {
                mpsc::error::TryRecvError::Empty => SubscriptionError::Empty,
                mpsc::error::TryRecvError::Disconnected => SubscriptionError::Closed,
            }),
        }
    }

    /// Wait up to `timeout`; `Ok(None)` when nothing arrived in time.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<M>, SubscriptionError> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reliable_subscription_keeps_every_message() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = Subscription::reliable(rx);

        for n in 0..5000u32 {
            tx.send(n).unwrap();
        }
        for n in 0..5000u32 {
            assert_eq!(sub.recv().await.unwrap(), n);
        }
        assert_eq!(sub.try_recv(), Err(SubscriptionError::Empty));

        drop(tx);
        assert_eq!(sub.recv().await, Err(SubscriptionError::Closed));
        assert_eq!(sub.try_recv(), Err(SubscriptionError::Closed));
    }
}
