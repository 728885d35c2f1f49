//! Request-coalescing memo cache
//!
//! Each key owns a [`OnceCell`]. The first caller for a key runs the
//! computation while concurrent callers for the same key wait on the same
//! cell. A successful value is kept for the lifetime of the cache; a failed
//! computation leaves the cell empty so the next caller runs it again.
//!
//! Computations run on a spawned task that owns the cell, so a caller that
//! is dropped mid-flight does not abort them. Later callers for the key wait
//! on the same computation instead of starting a new one.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio::task::JoinError;
use tracing::Instrument;

/// Snapshot of cache activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Requests answered from a stored value
    pub hits: u64,
    /// Computations started
    pub misses: u64,
    /// Requests that waited on another caller's in-flight computation
    pub coalesced: u64,
    /// Keys holding a value
    pub entries: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

/// Memo cache with single-flight population per key
#[derive(Debug)]
pub struct CoalescingCache<K, V>
where
    K: Eq + Hash,
{
    cells: DashMap<K, Arc<OnceCell<V>>>,
    counters: Arc<Counters>,
}

impl<K, V> Default for CoalescingCache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            cells: DashMap::new(),
            counters: Arc::default(),
        }
    }
}

impl<K, V> CoalescingCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored value for `key`, without starting a computation
    pub fn get(&self, key: &K) -> Option<V> {
        self.cells.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Return the stored value for `key`, or run `init` to produce it.
    ///
    /// At most one `init` runs per key at a time. Errors are returned to the
    /// caller that ran `init` and nothing is stored. `init` runs to completion
    /// on its own task even if every caller stops waiting.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, init: F) -> Result<V, E>
    where
        V: Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: From<JoinError> + Send + 'static,
    {
        let cell = Arc::clone(&self.cells.entry(key).or_default());

        if let Some(value) = cell.get() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value.clone());
        }

        let counters = Arc::clone(&self.counters);
        let task = tokio::spawn(
            async move {
                let mut ran_init = false;
                let result = cell
                    .get_or_try_init(|| {
                        ran_init = true;
                        counters.misses.fetch_add(1, Ordering::Relaxed);
                        init()
                    })
                    .await
                    .map(V::clone);

                if !ran_init {
                    counters.coalesced.fetch_add(1, Ordering::Relaxed);
                }
                result
            }
            .in_current_span(),
        );

        task.await?
    }

    /// Number of keys holding a value
    pub fn len(&self) -> usize {
        self.cells
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_miss_then_hit() {
        let cache: CoalescingCache<String, u32> = CoalescingCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let value = cache
                .get_or_try_insert_with("Fire".to_string(), || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Error>(7)
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(&"Fire".to_string()), Some(7));
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let cache: CoalescingCache<u8, u8> = CoalescingCache::new();

        let err = cache
            .get_or_try_insert_with(1, || async { Err::<u8, _>(Error::inference("engine down")) })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("engine down"));
        assert!(cache.get(&1).is_none());
        assert!(cache.is_empty());

        let value = cache
            .get_or_try_insert_with(1, || async { Ok::<_, Error>(2) })
            .await
            .unwrap();
        assert_eq!(value, 2);
        assert_eq!(cache.stats().misses, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_share_one_computation() {
        let cache: Arc<CoalescingCache<&'static str, String>> = Arc::new(CoalescingCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_try_insert_with("Steam", || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, Error>("Water+Fire".to_string())
                        })
                        .await
                })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            assert_eq!(task.unwrap().unwrap(), "Water+Fire");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits + stats.coalesced, 15);
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_abort_computation() {
        let cache: CoalescingCache<&'static str, u32> = CoalescingCache::new();
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));

        let init = {
            let started = Arc::clone(&started);
            let finished = Arc::clone(&finished);
            move || async move {
                started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(42)
            }
        };
        let timed_out = tokio::time::timeout(
            Duration::from_millis(20),
            cache.get_or_try_insert_with("Steam", init),
        )
        .await;
        assert!(timed_out.is_err());

        // A second caller waits on the computation already in flight.
        let value = cache
            .get_or_try_insert_with("Steam", || async { Ok::<_, Error>(0) })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.coalesced, 1);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let cache: CoalescingCache<(String, String), &'static str> = CoalescingCache::new();
        let ab = ("A".to_string(), "B".to_string());
        let ba = ("B".to_string(), "A".to_string());

        cache
            .get_or_try_insert_with(ab.clone(), || async { Ok::<_, Error>("ab") })
            .await
            .unwrap();
        let value = cache
            .get_or_try_insert_with(ba, || async { Ok::<_, Error>("ba") })
            .await
            .unwrap();

        assert_eq!(value, "ba");
        assert_eq!(cache.get(&ab), Some("ab"));
        assert_eq!(cache.len(), 2);
    }
}
