//! TTL cache store with substring-pattern invalidation.
//!
//! The cache is purely advisory: it shields the exchange's rate limit from
//! repeated reads and is never consulted as a source of truth. Entries carry
//! their own TTL so one store can hold every tier (tickers for seconds,
//! exchange metadata for an hour).
//!
//! # Expiry
//!
//! ```text
//! get(key)  →  elapsed <= ttl  →  Some(value)   (hit)
//!           →  elapsed >  ttl  →  evict, None   (miss)
//!           →  absent          →  None          (miss)
//! ```
//!
//! There is no size bound; entries are small and short-lived.
//!
//! # Generations
//!
//! Every invalidation bumps a generation counter. A fetch that started
//! before an invalidation stores its result through
//! [`set_if_generation`](CacheStore::set_if_generation) and is dropped, so a
//! read racing a write can never repopulate the cache with pre-write data.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

/// Default TTL tiers, overridable through config.
pub mod ttl {
    use std::time::Duration;

    pub const TICKER: Duration = Duration::from_secs(3);
    pub const ORDERS: Duration = Duration::from_secs(15);
    pub const BALANCE: Duration = Duration::from_secs(30);
    pub const ORDER_HISTORY: Duration = Duration::from_secs(600);
    pub const METADATA: Duration = Duration::from_secs(3600);
}

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    #[inline]
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) <= self.ttl
    }
}

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStoreStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped because their TTL ran out.
    pub expired: u64,
    /// Entries dropped by explicit or pattern invalidation.
    pub invalidated: u64,
}

/// Key → value store with per-entry TTL.
///
/// Thread-safe; every operation holds the internal lock only for the map
/// access itself.
pub struct CacheStore<V> {
    entries: Mutex<AHashMap<String, CacheEntry<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    invalidated: AtomicU64,
    generation: AtomicU64,
}

impl<V: Clone> CacheStore<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(AHashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            invalidated: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }

    /// Returns the cached value if it is still within its TTL.
    ///
    /// An expired entry is evicted on the spot.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get(key) {
            Some(entry) if entry.is_fresh(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.expired.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Like [`get`](Self::get) but leaves the counters and stale entries alone.
    pub fn peek(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        self.entries.lock().get(key).filter(|entry| entry.is_fresh(now)).map(|entry| entry.value.clone())
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let entry = CacheEntry { value, stored_at: Instant::now(), ttl };
        self.entries.lock().insert(key.into(), entry);
    }

    /// Current invalidation generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// [`set`](Self::set), unless an invalidation happened since `generation`
    /// was read. Returns whether the value was stored.
    pub fn set_if_generation(&self, key: impl Into<String>, value: V, ttl: Duration, generation: u64) -> bool {
        let mut entries = self.entries.lock();
        if self.generation.load(Ordering::Acquire) != generation {
            return false;
        }
        entries.insert(key.into(), CacheEntry { value, stored_at: Instant::now(), ttl });
        true
    }

    /// Remove one key. Returns `true` if it was present.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut entries = self.entries.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        let removed = entries.remove(key).is_some();
        if removed {
            self.invalidated.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Remove every key containing `pattern`. Returns how many were removed.
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let mut entries = self.entries.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        let before = entries.len();
        entries.retain(|key, _| !key.contains(pattern));
        let removed = before - entries.len();
        self.invalidated.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Drop every expired entry. Reads evict lazily, so this is only needed to
    /// bound memory for keys that are never read again.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));
        let removed = before - entries.len();
        self.expired.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Number of stored entries, expired ones included until evicted.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStoreStats {
        CacheStoreStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
        }
    }
}

impl<V: Clone> Default for CacheStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for CacheStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore").field("entries", &self.entries.lock().len()).finish()
    }
}
