//! Tables each map configuration depends on, cached per database and
//! configuration token.
//!
//! The set drives `X-Cache-Channel`, `Surrogate-Key`, `Last-Modified` and
//! `Cache-Control` headers and tells the invalidation endpoint which
//! configurations a table change affects.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tilegraph_core::affected_tables::AffectedTables;
use tilegraph_core::capability::SqlRunner;
use tilegraph_core::error::CoreError;
use tilegraph_core::mapconfig::MapConfig;
use tilegraph_core::query::{affected_tables_query, zero_rows_probe};

/// Access to a resolved map configuration and who it belongs to.
pub trait MapConfigProvider: Send + Sync {
    fn dbname(&self) -> &str;
    /// Database role used to introspect queries.
    fn user(&self) -> &str;
    fn token(&self) -> &str;
    fn map_config(&self) -> &MapConfig;
}

/// Affected tables keyed by `(database, token)`.
#[derive(Debug, Default)]
pub struct AffectedTablesCache {
    entries: RwLock<HashMap<(String, String), Arc<AffectedTables>>>,
}

impl AffectedTablesCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, dbname: &str, token: &str) -> Option<Arc<AffectedTables>> {
        self.entries
            .read()
            .get(&(dbname.to_string(), token.to_string()))
            .cloned()
    }

    pub fn set(&self, dbname: &str, token: &str, tables: Arc<AffectedTables>) {
        self.entries
            .write()
            .insert((dbname.to_string(), token.to_string()), tables);
    }

    pub fn contains(&self, dbname: &str, token: &str) -> bool {
        self.entries
            .read()
            .contains_key(&(dbname.to_string(), token.to_string()))
    }

    pub fn remove(&self, dbname: &str, token: &str) -> Option<Arc<AffectedTables>> {
        self.entries
            .write()
            .remove(&(dbname.to_string(), token.to_string()))
    }

    /// Forget every configuration of `dbname` that reads `table`. Returns
    /// the tokens removed.
    pub fn purge_table(&self, dbname: &str, table: &str) -> Vec<String> {
        let mut entries = self.entries.write();
        let keys: Vec<(String, String)> = entries
            .iter()
            .filter(|((db, _), tables)| db == dbname && tables.contains(dbname, table))
            .map(|(key, _)| key.clone())
            .collect();
        keys.into_iter()
            .filter_map(|key| entries.remove(&key).map(|_| key.1))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Computes affected tables on demand, consulting the cache first.
///
/// Two concurrent misses for the same configuration both query the
/// database; the result is the same either way.
pub struct AffectedTablesResolver {
    cache: Arc<AffectedTablesCache>,
    sql: Arc<dyn SqlRunner>,
}

impl AffectedTablesResolver {
    pub fn new(cache: Arc<AffectedTablesCache>, sql: Arc<dyn SqlRunner>) -> Self {
        Self { cache, sql }
    }

    pub fn cache(&self) -> &Arc<AffectedTablesCache> {
        &self.cache
    }

    pub async fn get_affected_tables(
        &self,
        provider: &dyn MapConfigProvider,
    ) -> Result<Arc<AffectedTables>, CoreError> {
        if let Some(tables) = self.cache.get(provider.dbname(), provider.token()) {
            return Ok(tables);
        }
        self.create_affected_tables(provider).await
    }

    /// Query the database for the tables every layer reads and cache the
    /// result. A configuration without layer SQL reads no tables and is
    /// not cached.
    pub async fn create_affected_tables(
        &self,
        provider: &dyn MapConfigProvider,
    ) -> Result<Arc<AffectedTables>, CoreError> {
        let Some(sql) = layer_queries(provider.map_config()) else {
            return Ok(Arc::new(AffectedTables::default()));
        };

        let rows = self
            .sql
            .query(provider.user(), &affected_tables_query(&sql))
            .await?;
        let tables = Arc::new(AffectedTables::from_rows(&rows)?);

        tracing::debug!(
            dbname = provider.dbname(),
            token = provider.token(),
            tables = tables.len(),
            "Affected tables computed",
        );
        self.cache
            .set(provider.dbname(), provider.token(), Arc::clone(&tables));
        Ok(tables)
    }
}

/// Every layer query plus a zero-row probe per table a layer already
/// declares, joined into one statement list.
fn layer_queries(config: &MapConfig) -> Option<String> {
    let mut queries = Vec::new();
    for layer in &config.layers {
        if let Some(sql) = &layer.options.sql {
            queries.push(sql.clone());
        }
        queries.extend(layer.options.affected_tables.iter().map(|t| zero_rows_probe(t)));
    }
    (!queries.is_empty()).then(|| queries.join(";"))
}
