//! Freshness oracles: when did the data behind a cached tile last change?
//!
//! The tile cache asks its oracle on every hit. An answer newer than the
//! entry's creation time turns the hit into a miss.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use parking_lot::RwLock;
use serde_json::Value;
use tilegraph_core::affected_tables::AffectedTables;
use tilegraph_core::capability::SqlRunner;
use tilegraph_core::error::CoreError;
use tilegraph_core::query::last_updated_query;
use tilegraph_core::types::Timestamp;

#[async_trait]
pub trait FreshnessOracle: Send + Sync {
    /// Most recent change time of any of `tables`, if one is known.
    async fn last_invalidated(&self, tables: &AffectedTables) -> Result<Option<Timestamp>, CoreError>;
}

/// In-memory record of explicit invalidations, keyed by database and table
/// name as the invalidation request named it (`table` or `schema.table`).
#[derive(Debug, Default)]
pub struct InvalidationLedger {
    entries: RwLock<HashMap<(String, String), Timestamp>>,
}

impl InvalidationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `table` in `dbname` changed at `at`. Earlier timestamps
    /// never overwrite later ones.
    pub fn record(&self, dbname: &str, table: &str, at: Timestamp) {
        let mut entries = self.entries.write();
        let slot = entries
            .entry((dbname.to_string(), table.to_string()))
            .or_insert(at);
        if *slot < at {
            *slot = at;
        }
    }

    pub fn last_invalidated_table(&self, dbname: &str, table: &str) -> Option<Timestamp> {
        self.entries
            .read()
            .get(&(dbname.to_string(), table.to_string()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl FreshnessOracle for InvalidationLedger {
    async fn last_invalidated(&self, tables: &AffectedTables) -> Result<Option<Timestamp>, CoreError> {
        let entries = self.entries.read();
        Ok(entries
            .iter()
            .filter(|((dbname, name), _)| tables.contains(dbname, name))
            .map(|(_, at)| *at)
            .max())
    }
}

/// Asks the database for the newest `updated_at` of the tables in
/// `CDB_TableMetadata`.
pub struct SqlFreshnessOracle {
    sql: Arc<dyn SqlRunner>,
    user: String,
}

impl SqlFreshnessOracle {
    pub fn new(sql: Arc<dyn SqlRunner>, user: impl Into<String>) -> Self {
        Self {
            sql,
            user: user.into(),
        }
    }
}

#[async_trait]
impl FreshnessOracle for SqlFreshnessOracle {
    async fn last_invalidated(&self, tables: &AffectedTables) -> Result<Option<Timestamp>, CoreError> {
        if tables.is_empty() {
            return Ok(None);
        }
        let rows = self
            .sql
            .query(&self.user, &last_updated_query(&tables.identifiers()))
            .await?;

        let millis = rows
            .first()
            .and_then(|row| row.get("max"))
            .and_then(Value::as_f64);
        Ok(millis.and_then(|ms| DateTime::from_timestamp_millis(ms as i64)))
    }
}
