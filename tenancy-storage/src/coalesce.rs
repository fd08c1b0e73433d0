//! Per-key miss coalescing.
//!
//! When enabled, concurrent misses on the same cache key queue behind a
//! per-key async mutex. The first caller queries the directory and fills the
//! cache; the rest re-check the cache once they get the lock. Keys with no
//! waiters are dropped from the map when the last guard is released.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Table of in-flight misses keyed by encoded cache key.
#[derive(Debug, Default)]
pub struct MissCoalescer {
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl MissCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other caller holds `key`, then hold it.
    pub async fn acquire(&self, key: &str) -> FlightGuard<'_> {
        let lock = self
            .in_flight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = lock.lock_owned().await;

        FlightGuard {
            coalescer: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of keys with a holder or waiters.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Holds a key in the coalescer until dropped.
#[derive(Debug)]
pub struct FlightGuard<'a> {
    coalescer: &'a MissCoalescer,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own reference left means nobody is waiting.
        self.coalescer
            .in_flight
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_released_keys_are_removed() {
        let coalescer = MissCoalescer::new();
        {
            let _guard = coalescer.acquire("slug:nrna").await;
            assert_eq!(coalescer.in_flight(), 1);
        }
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let coalescer = MissCoalescer::new();
        let _a = coalescer.acquire("slug:acme").await;
        let b = tokio::time::timeout(Duration::from_millis(100), coalescer.acquire("slug:nrna")).await;
        assert!(b.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_key_is_serialized() {
        let coalescer = Arc::new(MissCoalescer::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coalescer = Arc::clone(&coalescer);
            let active = Arc::clone(&active);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _guard = coalescer.acquire("slug:hot").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(coalescer.in_flight(), 0);
    }
}
