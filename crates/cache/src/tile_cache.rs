//! In-process LRU tile cache with a fixed per-entry TTL.
//!
//! Entries are keyed by the normalized tile request fingerprint. Every hit
//! consults a [`FreshnessOracle`]; an entry created before the most recent
//! change of one of its tables is dropped and reported as a miss.
//!
//! The TTL is measured from insertion and is not extended by hits. Each
//! entry owns one timer task; replacing, removing or evicting the entry
//! cancels it, and a generation number guards against a timer that fires
//! for an entry that has since been replaced.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tilegraph_core::affected_tables::AffectedTables;
use tilegraph_core::headers::{http_date, X_CACHE_HIT};
use tilegraph_core::types::Timestamp;

use crate::error::CacheError;
use crate::freshness::FreshnessOracle;

/// Size in bytes of a fully transparent 256x256 PNG.
const BLANK_TILE_SIZE: usize = 334;

/// Response headers stored alongside a tile, in insertion order.
pub type HeaderList = Vec<(String, String)>;

#[derive(Debug, Clone, Copy)]
pub struct TileCacheConfig {
    pub max_items: usize,
    pub ttl: Duration,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            max_items: 2048,
            ttl: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
struct TileCacheEntry {
    tile: Bytes,
    headers: HeaderList,
    created_at: Timestamp,
    hits: u64,
    render_time: Duration,
    /// Time spent serving the most recent hit.
    cache_time: Duration,
    tables: Arc<AffectedTables>,
}

/// A tile served from the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedTile {
    pub tile: Bytes,
    /// Stored headers plus `X-Cache-Hit` and `Last-Modified`.
    pub headers: HeaderList,
    pub last_modified: Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(CachedTile),
    /// The client's copy is current.
    NotModified { last_modified: Timestamp },
    Miss,
}

/// Sort key for per-tile statistics. Tiles are listed in descending order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    Hits,
    Length,
    RenderTime,
    CacheTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileInfo {
    pub key: String,
    pub length: usize,
    pub hits: u64,
    /// Seconds.
    pub render_time: f64,
    /// Seconds.
    pub cache_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_invalidated: u64,
    pub cache_not_modified: u64,
    pub expired: u64,
    pub evicted: u64,
    pub current_items: usize,
    /// Peak number of items held at once.
    pub max_items: usize,
    pub memory: usize,
    pub memory_per_item: f64,
    pub ratio: f64,
    pub blank_tile_count: usize,
    pub blank_tile_size: usize,
    pub blank_items_ratio: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tiles: Vec<TileInfo>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    hits: u64,
    misses: u64,
    invalidated: u64,
    not_modified: u64,
    expired: u64,
    evicted: u64,
    peak_items: usize,
}

struct CacheState {
    entries: LruCache<String, TileCacheEntry>,
    timers: HashMap<String, (u64, AbortHandle)>,
    generation: u64,
    counters: Counters,
}

impl CacheState {
    fn cancel_timer(&mut self, key: &str) {
        if let Some((_, handle)) = self.timers.remove(key) {
            handle.abort();
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        self.cancel_timer(key);
        self.entries.pop(key).is_some()
    }

    fn expire(&mut self, key: &str, generation: u64) {
        if self.timers.get(key).map(|(g, _)| *g) != Some(generation) {
            return;
        }
        self.timers.remove(key);
        if self.entries.pop(key).is_some() {
            self.counters.expired += 1;
            tracing::trace!(key, "Tile cache entry expired");
        }
    }

    fn track_peak(&mut self) {
        self.counters.peak_items = self.counters.peak_items.max(self.entries.len());
    }
}

impl Drop for CacheState {
    fn drop(&mut self) {
        for (_, (_, handle)) in self.timers.drain() {
            handle.abort();
        }
    }
}

/// Shared tile cache. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TileCache {
    state: Arc<Mutex<CacheState>>,
    oracle: Arc<dyn FreshnessOracle>,
    ttl: Duration,
}

impl std::fmt::Debug for TileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TileCache {
    pub fn new(config: TileCacheConfig, oracle: Arc<dyn FreshnessOracle>) -> Result<Self, CacheError> {
        let capacity = NonZeroUsize::new(config.max_items).ok_or_else(|| {
            CacheError::InvalidConfig("tile cache max_items must be greater than zero".into())
        })?;
        if config.ttl.is_zero() {
            return Err(CacheError::InvalidConfig(
                "tile cache ttl must be greater than zero".into(),
            ));
        }
        Ok(Self {
            state: Arc::new(Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                timers: HashMap::new(),
                generation: 0,
                counters: Counters::default(),
            })),
            oracle,
            ttl: config.ttl,
        })
    }

    /// Look up a tile.
    ///
    /// `if_modified_since` is compared at second precision against the
    /// entry's creation time. A failing oracle counts as a miss and leaves
    /// the entry in place.
    pub async fn lookup(&self, key: &str, if_modified_since: Option<Timestamp>) -> CacheLookup {
        let started = Instant::now();

        let (created_at, tables) = {
            let mut state = self.state.lock();
            match state.entries.peek(key) {
                Some(entry) => (entry.created_at, Arc::clone(&entry.tables)),
                None => {
                    state.counters.misses += 1;
                    return CacheLookup::Miss;
                }
            }
        };

        let invalidated_at = match self.oracle.last_invalidated(&tables).await {
            Ok(at) => at,
            Err(e) => {
                tracing::warn!(key, error = %e, "Freshness check failed, treating as miss");
                self.state.lock().counters.misses += 1;
                return CacheLookup::Miss;
            }
        };

        let mut guard = self.state.lock();
        let state = &mut *guard;

        if invalidated_at.is_some_and(|at| at > created_at) {
            state.counters.misses += 1;
            state.counters.invalidated += 1;
            // Only drop the entry we validated; it may have been replaced meanwhile.
            if state.entries.peek(key).map(|e| e.created_at) == Some(created_at) {
                state.remove(key);
            }
            tracing::debug!(key, "Tile cache entry invalidated");
            return CacheLookup::Miss;
        }

        let Some(entry) = state.entries.get_mut(key) else {
            state.counters.misses += 1;
            return CacheLookup::Miss;
        };
        entry.hits += 1;
        entry.cache_time = started.elapsed();
        state.counters.hits += 1;

        let last_modified = entry.created_at;
        if if_modified_since.is_some_and(|ims| ims.timestamp() >= last_modified.timestamp()) {
            state.counters.not_modified += 1;
            return CacheLookup::NotModified { last_modified };
        }

        let mut headers = entry.headers.clone();
        headers.push((X_CACHE_HIT.to_string(), "true".to_string()));
        headers.push(("Last-Modified".to_string(), http_date(last_modified)));
        CacheLookup::Hit(CachedTile {
            tile: entry.tile.clone(),
            headers,
            last_modified,
        })
    }

    /// Store a freshly rendered tile, replacing any previous entry for
    /// `key`, and start its TTL timer. Must be called inside a tokio runtime.
    pub fn store(
        &self,
        key: &str,
        tile: Bytes,
        headers: HeaderList,
        render_time: Duration,
        tables: Arc<AffectedTables>,
    ) {
        let entry = TileCacheEntry {
            tile,
            headers,
            created_at: Utc::now(),
            hits: 0,
            render_time,
            cache_time: Duration::ZERO,
            tables,
        };

        let mut state = self.state.lock();
        state.cancel_timer(key);
        if let Some((evicted, _)) = state.entries.push(key.to_string(), entry) {
            if evicted != key {
                state.cancel_timer(&evicted);
                state.counters.evicted += 1;
                tracing::trace!(key = %evicted, "Tile cache entry evicted");
            }
        }
        state.track_peak();

        state.generation += 1;
        let generation = state.generation;
        let handle = spawn_expiry(Arc::downgrade(&self.state), key.to_string(), generation, self.ttl);
        state.timers.insert(key.to_string(), (generation, handle));
    }

    /// Drop an entry. Returns whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.state.lock().remove(key)
    }

    /// Drop every entry that depends on `table` in `dbname`. Returns the
    /// number of entries removed.
    pub fn purge_tables(&self, dbname: &str, table: &str) -> usize {
        let mut state = self.state.lock();
        let keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.tables.contains(dbname, table))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            state.remove(key);
        }
        keys.len()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self, include_tiles: bool, sort_by: SortBy) -> CacheStats {
        let state = self.state.lock();
        let counters = state.counters;
        let current_items = state.entries.len();

        let mut memory = 0;
        let mut blank_tile_count = 0;
        let mut tiles = Vec::new();
        for (key, entry) in state.entries.iter() {
            memory += entry.tile.len();
            if entry.tile.len() == BLANK_TILE_SIZE {
                blank_tile_count += 1;
            }
            if include_tiles {
                tiles.push(TileInfo {
                    key: key.clone(),
                    length: entry.tile.len(),
                    hits: entry.hits,
                    render_time: entry.render_time.as_secs_f64(),
                    cache_time: entry.cache_time.as_secs_f64(),
                });
            }
        }
        drop(state);

        sort_tiles(&mut tiles, sort_by);

        let requests = counters.hits + counters.misses;
        let ratio = |n: f64, d: f64| if d > 0.0 { n / d } else { 0.0 };
        CacheStats {
            cache_hits: counters.hits,
            cache_misses: counters.misses,
            cache_invalidated: counters.invalidated,
            cache_not_modified: counters.not_modified,
            expired: counters.expired,
            evicted: counters.evicted,
            current_items,
            max_items: counters.peak_items,
            memory,
            memory_per_item: ratio(memory as f64, current_items as f64),
            ratio: ratio(counters.hits as f64, requests as f64),
            blank_tile_count,
            blank_tile_size: blank_tile_count * BLANK_TILE_SIZE,
            blank_items_ratio: ratio(blank_tile_count as f64, current_items as f64),
            tiles,
        }
    }
}

fn spawn_expiry(
    state: Weak<Mutex<CacheState>>,
    key: String,
    generation: u64,
    ttl: Duration,
) -> AbortHandle {
    tokio::spawn(async move {
        tokio::time::sleep(ttl).await;
        if let Some(state) = state.upgrade() {
            state.lock().expire(&key, generation);
        }
    })
    .abort_handle()
}

fn sort_tiles(tiles: &mut [TileInfo], sort_by: SortBy) {
    match sort_by {
        SortBy::Hits => tiles.sort_by(|a, b| b.hits.cmp(&a.hits)),
        SortBy::Length => tiles.sort_by(|a, b| b.length.cmp(&a.length)),
        SortBy::RenderTime => tiles.sort_by(|a, b| b.render_time.total_cmp(&a.render_time)),
        SortBy::CacheTime => tiles.sort_by(|a, b| b.cache_time.total_cmp(&a.cache_time)),
    }
}
