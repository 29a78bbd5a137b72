//! Capacity-bounded TTL cache shared across concurrent requests.
//!
//! Entries expire lazily: an expired entry is reported as a miss on
//! [`TtlCache::get`] and removed then. Every [`TtlCache::set`] also sweeps
//! expired entries. When the cache is full, the entry with the oldest
//! insertion time is evicted before the new one is stored.
//!
//! All state sits behind one `parking_lot::Mutex`; each public call takes
//! the lock once. Hit and miss counters are atomics outside the lock.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    /// `None` when the TTL is too large to represent: never expires.
    expires_at: Option<Instant>,
    seq: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Insertion order as `(key, seq)`. A pair whose seq no longer matches
    /// the live entry is stale and skipped during eviction.
    order: VecDeque<(String, u64)>,
    next_seq: u64,
}

impl<V> Inner<V> {
    fn evict_oldest(&mut self) {
        while let Some((key, seq)) = self.order.pop_front() {
            let live = self.entries.get(&key).is_some_and(|e| e.seq == seq);
            if live {
                self.entries.remove(&key);
                return;
            }
        }
    }

    fn sweep_expired(&mut self, now: Instant) {
        self.entries.retain(|_, e| !e.is_expired(now));
        let entries = &self.entries;
        self.order
            .retain(|(key, seq)| entries.get(key).is_some_and(|e| e.seq == *seq));
    }
}

/// Generic TTL key/value cache.
pub struct TtlCache<V> {
    inner: Mutex<Inner<V>>,
    capacity: usize,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    /// A cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                next_seq: 0,
            }),
            capacity: capacity.max(1),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let found = match inner.entries.get(key).map(|e| e.is_expired(now)) {
            Some(false) => inner.entries.get(key).map(|e| e.value.clone()),
            Some(true) => {
                inner.entries.remove(key);
                None
            }
            None => None,
        };
        drop(inner);

        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Store `value` under `key` for `ttl`, replacing any previous entry.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let now = Instant::now();
        let mut inner = self.inner.lock();

        inner.sweep_expired(now);
        if !inner.entries.contains_key(&key) {
            while inner.entries.len() >= self.capacity {
                inner.evict_oldest();
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.push_back((key.clone(), seq));
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now.checked_add(ttl),
                seq,
            },
        );
    }

    /// Store with the cache's default TTL.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.set(key, value, self.default_ttl);
    }

    /// Remove every entry. Counters are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.inner.lock().entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}
