//! Request-coalescing result cache.
//!
//! At most one computation runs per fingerprint: the first caller registers
//! a per-key in-flight cell before computing, later callers await the same
//! cell and share the winner's value. Failed computations are never stored
//! and never poison the key; the next caller simply computes again. The
//! store itself is a size-bounded LRU with a TTL, and computations run
//! outside the map lock so eviction never blocks a different key.

use lru::LruCache;
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

use crate::error::Result;
use crate::fingerprint::Fingerprint;

/// Statistics for one cache region. Counters are monotonically
/// non-decreasing for the life of the process.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RegionStats {
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate: f64,
    pub eviction_count: u64,
    pub average_load_time_ms: f64,
    pub size: usize,
}

struct StoredEntry<T> {
    value: T,
    created_at: Instant,
}

/// Concurrent cache of computed results keyed by specification fingerprint.
pub struct ResultCache<T> {
    entries: Mutex<LruCache<String, StoredEntry<T>>>,
    inflight: Mutex<HashMap<String, Arc<OnceCell<T>>>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    load_count: AtomicU64,
    load_nanos: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> ResultCache<T> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).expect("cache capacity must be at least 1");
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            inflight: Mutex::new(HashMap::new()),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            load_count: AtomicU64::new(0),
            load_nanos: AtomicU64::new(0),
        }
    }

    /// Cached value for a fingerprint, None on miss or TTL expiry.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<T> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(fingerprint.digest()) {
            Some(entry) if entry.created_at.elapsed() <= self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                // Expired: reclaim eagerly and report a miss
                entries.pop(fingerprint.digest());
                self.evictions.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Cached value, or run `compute` at most once per fingerprint across
    /// concurrent callers. Every caller observes the same value; an error is
    /// returned to its caller without being cached.
    pub async fn get_or_compute<F, Fut>(&self, fingerprint: &Fingerprint, compute: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.get(fingerprint) {
            return Ok(value);
        }

        let key = fingerprint.digest().to_string();
        let cell = {
            let mut inflight = self.inflight.lock().unwrap();
            Arc::clone(
                inflight
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let result = cell
            .get_or_try_init(|| async {
                let start = Instant::now();
                let value = compute().await?;
                self.record_load(start.elapsed());
                self.insert(&key, value.clone());
                Ok::<T, crate::error::BomGraphError>(value)
            })
            .await
            .map(T::clone);

        // Deregister our cell whether we won, waited, or failed; a stale
        // cell left behind would pin the first value past invalidation.
        let mut inflight = self.inflight.lock().unwrap();
        if let Some(existing) = inflight.get(&key) {
            if Arc::ptr_eq(existing, &cell) {
                inflight.remove(&key);
            }
        }

        result
    }

    fn insert(&self, key: &str, value: T) {
        let mut entries = self.entries.lock().unwrap();
        let evicted = entries.push(
            key.to_string(),
            StoredEntry {
                value,
                created_at: Instant::now(),
            },
        );
        if let Some((old_key, _)) = evicted {
            if old_key != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Drop one fingerprint. In-flight computations for it are detached so
    /// the next caller starts fresh.
    pub fn invalidate(&self, fingerprint: &Fingerprint) {
        self.entries.lock().unwrap().pop(fingerprint.digest());
        self.inflight.lock().unwrap().remove(fingerprint.digest());
    }

    /// Drop every entry. Counted as evictions.
    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap();
        self.evictions
            .fetch_add(entries.len() as u64, Ordering::Relaxed);
        entries.clear();
        self.inflight.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record_load(&self, elapsed: Duration) {
        self.load_count.fetch_add(1, Ordering::Relaxed);
        self.load_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn stats(&self) -> RegionStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let load_count = self.load_count.load(Ordering::Relaxed);
        let load_nanos = self.load_nanos.load(Ordering::Relaxed);
        RegionStats {
            hit_count: hits,
            miss_count: misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            eviction_count: self.evictions.load(Ordering::Relaxed),
            average_load_time_ms: if load_count == 0 {
                0.0
            } else {
                (load_nanos as f64 / load_count as f64) / 1_000_000.0
            },
            size: self.len(),
        }
    }
}
