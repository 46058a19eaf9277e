use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tilegraph_core::capability::SqlRunner;
use tilegraph_core::error::CoreError;
use tilegraph_core::types::Row;
use tilegraph_pipeline::builder::SqlAnalysisBuilder;
use tilegraph_pipeline::{Pipeline, ResolutionContext};

/// In-memory SQL capability.
///
/// Column introspection returns a fixed column list; table introspection
/// reports every known table that appears after `FROM` in the query.
pub struct FakeSql {
    pub tables: Vec<&'static str>,
    pub calls: AtomicUsize,
}

impl FakeSql {
    pub fn new(tables: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            tables: tables.to_vec(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SqlRunner for FakeSql {
    async fn query(&self, _user: &str, sql: &str) -> Result<Vec<Row>, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let rows: Vec<Value> = self
            .tables
            .iter()
            .filter(|t| sql.contains(&format!("FROM {t}")))
            .map(|t| {
                json!({
                    "dbname": "cartodb_user_1_db",
                    "schema_name": "public",
                    "table_name": t,
                    "updated_at": "2024-03-01T12:00:00+00:00"
                })
            })
            .collect();
        Ok(serde_json::from_value(Value::Array(rows)).expect("rows"))
    }

    async fn columns(&self, _user: &str, _sql: &str) -> Result<Vec<String>, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(["cartodb_id", "the_geom", "the_geom_webmercator", "adm0name", "pop_max"]
            .iter()
            .map(|c| c.to_string())
            .collect())
    }
}

pub fn pipeline(sql: Arc<FakeSql>) -> Pipeline {
    Pipeline::new(Arc::new(SqlAnalysisBuilder::new(sql)))
}

pub fn ctx() -> ResolutionContext {
    ResolutionContext::new("cartodb_user_1_db", "cartodb_user_1")
}
