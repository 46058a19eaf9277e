//! Caches keyed by configuration and tile: the affected-tables cache that
//! backs cache headers and invalidation, and the in-process tile cache with
//! its freshness oracles.

pub mod affected_tables;
pub mod error;
pub mod freshness;
pub mod tile_cache;

pub use affected_tables::{AffectedTablesCache, AffectedTablesResolver, MapConfigProvider};
pub use error::CacheError;
pub use freshness::{FreshnessOracle, InvalidationLedger, SqlFreshnessOracle};
pub use tile_cache::{CacheLookup, CacheStats, CachedTile, SortBy, TileCache, TileCacheConfig};
