use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::json;
use tilegraph_cache::MapConfigProvider;
use tilegraph_core::capability::SqlRunner;
use tilegraph_core::error::CoreError;
use tilegraph_core::mapconfig::MapConfig;
use tilegraph_core::types::Row;

/// SQL capability answering affected-table introspection with fixed rows.
#[derive(Default)]
pub struct TablesSql {
    pub queries: AtomicUsize,
    pub fail: bool,
}

impl TablesSql {
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SqlRunner for TablesSql {
    async fn query(&self, _user: &str, sql: &str) -> Result<Vec<Row>, CoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CoreError::Dependency("connection refused".into()));
        }
        assert!(sql.contains("CDB_QueryTablesText"));
        let rows = json!([
            { "dbname": "db1", "schema_name": "public", "table_name": "roads", "updated_at": "2024-03-01T12:00:00Z" },
            { "dbname": "db1", "schema_name": "public", "table_name": "places", "updated_at": null }
        ]);
        Ok(serde_json::from_value(rows).unwrap())
    }

    async fn columns(&self, _user: &str, _sql: &str) -> Result<Vec<String>, CoreError> {
        Ok(vec![])
    }
}

pub struct Provider {
    pub token: String,
    pub config: MapConfig,
}

impl Provider {
    pub fn new(token: &str, sql: &str) -> Self {
        Self {
            token: token.into(),
            config: serde_json::from_value(json!({
                "layers": [{ "type": "cartodb", "options": { "sql": sql } }]
            }))
            .unwrap(),
        }
    }
}

impl MapConfigProvider for Provider {
    fn dbname(&self) -> &str {
        "db1"
    }

    fn user(&self) -> &str {
        "db1_user"
    }

    fn token(&self) -> &str {
        &self.token
    }

    fn map_config(&self) -> &MapConfig {
        &self.config
    }
}
