use std::sync::Arc;

use tilegraph_cache::{
    AffectedTablesCache, AffectedTablesResolver, CacheError, FreshnessOracle, InvalidationLedger,
    SqlFreshnessOracle, TileCache,
};
use tilegraph_core::capability::{SqlRunner, TileRenderer};
use tilegraph_pipeline::builder::SqlAnalysisBuilder;
use tilegraph_pipeline::{Pipeline, ResolutionContext};

use crate::config::{FreshnessSource, ServerConfig};
use crate::invalidator::Invalidator;
use crate::map_store::MapStore;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: everything is behind an `Arc` or is a handle.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub sql: Arc<dyn SqlRunner>,
    pub pipeline: Arc<Pipeline>,
    pub affected_tables: Arc<AffectedTablesResolver>,
    pub tile_cache: TileCache,
    /// Table invalidations posted to this process.
    pub ledger: Arc<InvalidationLedger>,
    pub renderer: Arc<dyn TileRenderer>,
    pub maps: Arc<MapStore>,
    /// `None` when no downstream cache is configured.
    pub invalidator: Option<Invalidator>,
}

impl AppState {
    /// Wire the caches and the pipeline around the given collaborators.
    pub fn new(
        config: ServerConfig,
        sql: Arc<dyn SqlRunner>,
        renderer: Arc<dyn TileRenderer>,
        invalidator: Option<Invalidator>,
    ) -> Result<Self, CacheError> {
        let ledger = Arc::new(InvalidationLedger::new());
        let oracle: Arc<dyn FreshnessOracle> = match config.freshness {
            FreshnessSource::Ledger => Arc::clone(&ledger) as Arc<dyn FreshnessOracle>,
            FreshnessSource::Sql => Arc::new(SqlFreshnessOracle::new(
                Arc::clone(&sql),
                config.db_user.clone(),
            )),
        };
        let tile_cache = TileCache::new(config.tile_cache, oracle)?;

        let pipeline = Pipeline::new(Arc::new(SqlAnalysisBuilder::new(Arc::clone(&sql))))
            .with_analysis_parallelism(config.analysis_parallelism);
        let affected_tables = AffectedTablesResolver::new(
            Arc::new(AffectedTablesCache::new()),
            Arc::clone(&sql),
        );
        let maps = MapStore::new(config.map_store_max_items);

        Ok(Self {
            config: Arc::new(config),
            sql,
            pipeline: Arc::new(pipeline),
            affected_tables: Arc::new(affected_tables),
            tile_cache,
            ledger,
            renderer,
            maps: Arc::new(maps),
            invalidator,
        })
    }

    /// The database and role every request is resolved for.
    pub fn resolution_context(&self) -> ResolutionContext {
        ResolutionContext::new(self.config.dbname.clone(), self.config.db_user.clone())
    }
}
