//! A single bounded LRU + TTL cache pool.
//!
//! Each pool enforces two bounds at all times: `count <= max_count` and
//! `sum(size_bytes) <= max_bytes`. Recency is tracked with a monotonically
//! increasing tick per access, so the least-recently-used entry is always the
//! first key of the recency map.
//!
//! Expired entries are purged lazily by [`CachePool::get`] and in bulk by
//! [`CachePool::purge_expired`], which the background sweeper calls.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

use super::clock::{Clock, SystemClock};
use crate::config::PoolConfig;
use crate::model::{Metadata, ScoredCandidate};

// ---------------------------------------------------------------------------
// Weigh
// ---------------------------------------------------------------------------

/// Approximate heap footprint of a cached value, in bytes.
pub trait Weigh {
    fn weigh(&self) -> usize;
}

impl Weigh for String {
    fn weigh(&self) -> usize {
        self.len()
    }
}

impl Weigh for f32 {
    fn weigh(&self) -> usize {
        std::mem::size_of::<Self>()
    }
}

impl<T: Weigh> Weigh for Vec<T> {
    fn weigh(&self) -> usize {
        self.iter().map(Weigh::weigh).sum()
    }
}

impl Weigh for Metadata {
    fn weigh(&self) -> usize {
        self.iter()
            .map(|(key, value)| key.len() + value.to_string().len())
            .sum()
    }
}

impl Weigh for ScoredCandidate {
    fn weigh(&self) -> usize {
        std::mem::size_of::<Self>() + self.doc_id.len() + self.content.len() + self.metadata.weigh()
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// Bookkeeping for one cached value, as exposed for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub key: String,
    pub scope: Option<String>,
    pub created_at: Instant,
    pub accessed_at: Instant,
    pub access_count: u64,
    pub ttl: Option<Duration>,
    pub size_bytes: usize,
}

impl EntryInfo {
    fn is_expired(&self, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(self.created_at) > ttl)
    }
}

struct Entry<V> {
    value: Arc<V>,
    info: EntryInfo,
    tick: u64,
}

struct PoolState<V> {
    entries: HashMap<String, Entry<V>>,
    /// tick -> key, oldest first.
    recency: BTreeMap<u64, String>,
    next_tick: u64,
    bytes: usize,
}

impl<V> PoolState<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
            bytes: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn insert(&mut self, value: Arc<V>, info: EntryInfo) {
        let tick = self.tick();
        self.bytes += info.size_bytes;
        self.recency.insert(tick, info.key.clone());
        self.entries
            .insert(info.key.clone(), Entry { value, info, tick });
    }

    fn touch(&mut self, key: &str, now: Instant) -> Option<Arc<V>> {
        let tick = self.tick();
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.tick);
        entry.tick = tick;
        entry.info.accessed_at = now;
        entry.info.access_count += 1;
        self.recency.insert(tick, key.to_string());
        Some(Arc::clone(&entry.value))
    }

    fn remove(&mut self, key: &str) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        self.bytes -= entry.info.size_bytes;
        Some(entry)
    }

    fn evict_lru(&mut self) -> Option<Entry<V>> {
        let (_, key) = self.recency.pop_first()?;
        let entry = self.entries.remove(&key)?;
        self.bytes -= entry.info.size_bytes;
        Some(entry)
    }

    fn remove_where(&mut self, mut pred: impl FnMut(&EntryInfo) -> bool) -> usize {
        let doomed: Vec<String> = self
            .entries
            .values()
            .filter(|entry| pred(&entry.info))
            .map(|entry| entry.info.key.clone())
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// Point-in-time view of a pool's occupancy and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub name: &'static str,
    pub count: usize,
    pub bytes: usize,
    pub max_count: usize,
    pub max_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl PoolStats {
    /// Fraction of lookups that hit, or `0.0` before any lookup.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// ---------------------------------------------------------------------------
// CachePool
// ---------------------------------------------------------------------------

/// A bounded, thread-safe LRU cache with optional per-entry TTL.
///
/// All operations take the pool's lock exactly once.
pub struct CachePool<V> {
    name: &'static str,
    max_count: usize,
    max_bytes: usize,
    default_ttl: Option<Duration>,
    state: Mutex<PoolState<V>>,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl<V: Weigh> CachePool<V> {
    /// Create a pool bounded by `config`, using the system clock.
    #[must_use]
    pub fn new(name: &'static str, config: &PoolConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Create a pool with an explicit time source.
    #[must_use]
    pub fn with_clock(name: &'static str, config: &PoolConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            max_count: config.max_count,
            max_bytes: config.max_bytes,
            default_ttl: config.ttl(),
            state: Mutex::new(PoolState::new()),
            clock,
            counters: Counters::default(),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    /// Look up `key`, bumping it to most-recently-used on a hit.
    ///
    /// An entry older than its TTL is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let Some(expired) = state
            .entries
            .get(key)
            .map(|entry| entry.info.is_expired(now))
        else {
            drop(state);
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if expired {
            state.remove(key);
            drop(state);
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let value = state.touch(key, now);
        drop(state);
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        value
    }

    /// Insert with the pool's default TTL and no scope.
    pub fn set(&self, key: impl Into<String>, value: V) -> bool {
        self.set_with(key, value, self.default_ttl, None)
    }

    /// Insert with the pool's default TTL, tagged with `scope`.
    pub fn set_scoped(&self, scope: &str, key: impl Into<String>, value: V) -> bool {
        self.set_with(key, value, self.default_ttl, Some(scope))
    }

    /// Insert or replace `key`.
    ///
    /// Least-recently-used entries are evicted until the new entry fits both
    /// bounds. A value larger than `max_bytes` on its own is not stored (and
    /// any previous value under `key` is dropped); returns `false` in that case.
    pub fn set_with(
        &self,
        key: impl Into<String>,
        value: V,
        ttl: Option<Duration>,
        scope: Option<&str>,
    ) -> bool {
        let key = key.into();
        let size_bytes = key.len() + value.weigh();
        let now = self.clock.now();

        let mut state = self.state.lock();
        state.remove(&key);

        if size_bytes > self.max_bytes {
            drop(state);
            debug!(
                pool = self.name,
                size_bytes,
                max_bytes = self.max_bytes,
                "value exceeds pool byte bound; not cached"
            );
            return false;
        }

        let mut evicted = 0u64;
        while state.entries.len() >= self.max_count || state.bytes + size_bytes > self.max_bytes {
            if state.evict_lru().is_none() {
                break;
            }
            evicted += 1;
        }

        state.insert(
            Arc::new(value),
            EntryInfo {
                key,
                scope: scope.map(str::to_string),
                created_at: now,
                accessed_at: now,
                access_count: 0,
                ttl,
                size_bytes,
            },
        );
        drop(state);

        if evicted > 0 {
            self.counters.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
        true
    }
}

impl<V> CachePool<V> {
    /// Remove `key`. Returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.state.lock().remove(key).is_some()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.recency.clear();
        state.bytes = 0;
    }

    /// Remove every entry tagged with `scope`. Returns how many were removed.
    pub fn purge_scope(&self, scope: &str) -> usize {
        self.state
            .lock()
            .remove_where(|info| info.scope.as_deref() == Some(scope))
    }

    /// Remove every entry whose TTL has elapsed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let removed = self.state.lock().remove_where(|info| info.is_expired(now));
        if removed > 0 {
            self.counters
                .expirations
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Entry bookkeeping for `key` without touching recency.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<EntryInfo> {
        self.state
            .lock()
            .entries
            .get(key)
            .map(|entry| entry.info.clone())
    }

    /// All entries, least-recently-used first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<EntryInfo> {
        let state = self.state.lock();
        state
            .recency
            .values()
            .filter_map(|key| state.entries.get(key))
            .map(|entry| entry.info.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tracked byte total of all present entries.
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.state.lock().bytes
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let (count, bytes) = {
            let state = self.state.lock();
            (state.entries.len(), state.bytes)
        };
        PoolStats {
            name: self.name,
            count,
            bytes,
            max_count: self.max_count,
            max_bytes: self.max_bytes,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
        }
    }
}

impl<V> std::fmt::Debug for CachePool<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePool")
            .field("name", &self.name)
            .field("max_count", &self.max_count)
            .field("max_bytes", &self.max_bytes)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}
