//! Sliding-window marker storage.
//!
//! A window is a set of admission markers (millisecond timestamps) per key.
//! Markers with a timestamp `<= now - window` have expired.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::RateLimitError;

/// Outcome of one atomic evict + (maybe) insert + count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub admitted: bool,
    /// Live markers after the operation (including the new one when admitted).
    pub count: u32,
    /// Timestamp (ms) of the oldest live marker.
    pub oldest_ms: Option<i64>,
}

/// Storage for sliding-window markers.
///
/// `try_acquire` must be atomic across every caller sharing the store, in this
/// process and in others: the eviction, the capacity check and the insertion
/// happen as one unit. Rejected attempts leave no marker behind.
#[async_trait]
pub trait WindowStore: Send + Sync {
    async fn try_acquire(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u32,
    ) -> Result<WindowSnapshot, RateLimitError>;

    /// Evict expired markers and count the rest without inserting.
    async fn count(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<u32, RateLimitError>;
}

/// In-process window store; one mutex-guarded critical section per call.
#[derive(Debug, Default)]
pub struct InMemoryWindowStore {
    windows: Mutex<HashMap<String, VecDeque<i64>>>,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn evict(markers: &mut VecDeque<i64>, now_ms: i64, window_ms: i64) {
    let cutoff = now_ms - window_ms;
    while markers.front().is_some_and(|&ts| ts <= cutoff) {
        markers.pop_front();
    }
}

fn len_u32(markers: &VecDeque<i64>) -> u32 {
    u32::try_from(markers.len()).unwrap_or(u32::MAX)
}

#[async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn try_acquire(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u32,
    ) -> Result<WindowSnapshot, RateLimitError> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| RateLimitError::Storage("window store lock poisoned".into()))?;
        let markers = windows.entry(key.to_string()).or_default();
        evict(markers, now_ms, window_ms);

        let admitted = len_u32(markers) < limit;
        if admitted {
            // Keep the deque ordered even if the clock stepped backwards.
            let ts = markers.back().map_or(now_ms, |&last| last.max(now_ms));
            markers.push_back(ts);
        }

        Ok(WindowSnapshot {
            admitted,
            count: len_u32(markers),
            oldest_ms: markers.front().copied(),
        })
    }

    async fn count(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<u32, RateLimitError> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| RateLimitError::Storage("window store lock poisoned".into()))?;
        Ok(match windows.get_mut(key) {
            Some(markers) => {
                evict(markers, now_ms, window_ms);
                len_u32(markers)
            }
            None => 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_limit_then_rejects_without_marking() {
        let store = InMemoryWindowStore::new();
        for i in 1..=3 {
            let snap = store.try_acquire("k", 1_000, 100, 3).await.unwrap();
            assert!(snap.admitted);
            assert_eq!(snap.count, i);
        }
        let rejected = store.try_acquire("k", 1_010, 100, 3).await.unwrap();
        assert!(!rejected.admitted);
        assert_eq!(rejected.count, 3);
        assert_eq!(rejected.oldest_ms, Some(1_000));
        assert_eq!(store.count("k", 1_010, 100).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn markers_expire_at_window_boundary() {
        let store = InMemoryWindowStore::new();
        store.try_acquire("k", 1_000, 100, 1).await.unwrap();
        assert!(!store.try_acquire("k", 1_099, 100, 1).await.unwrap().admitted);
        assert!(store.try_acquire("k", 1_100, 100, 1).await.unwrap().admitted);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let store = InMemoryWindowStore::new();
        assert!(store.try_acquire("a", 0, 100, 1).await.unwrap().admitted);
        assert!(store.try_acquire("b", 0, 100, 1).await.unwrap().admitted);
        assert_eq!(store.count("c", 0, 100).await.unwrap(), 0);
    }
}
