//! [`SqlRunner`] over a PostgreSQL pool.
//!
//! Every call runs in its own transaction with `SET LOCAL ROLE` so queries
//! see exactly what the configuration's database user may see.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Column, Executor, Postgres, Statement, Transaction};
use tilegraph_core::capability::SqlRunner;
use tilegraph_core::error::CoreError;
use tilegraph_core::types::Row;

use crate::DbPool;

#[derive(Clone)]
pub struct PgSqlRunner {
    pool: DbPool,
}

impl PgSqlRunner {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn begin_as(&self, user: &str) -> Result<Transaction<'static, Postgres>, CoreError> {
        let mut tx = self.pool.begin().await.map_err(CoreError::dependency)?;
        if let Some(statement) = set_role_statement(user) {
            (&mut *tx).execute(statement.as_str())
                .await
                .map_err(CoreError::dependency)?;
        }
        Ok(tx)
    }
}

/// `SET LOCAL ROLE "<user>"`, or nothing for an empty user.
fn set_role_statement(user: &str) -> Option<String> {
    (!user.is_empty()).then(|| format!("SET LOCAL ROLE \"{}\"", user.replace('"', "\"\"")))
}

/// Project every row of `sql` to one JSON object.
fn json_rows_query(sql: &str) -> String {
    format!("SELECT row_to_json(_tilegraph_rows) FROM ({sql}) _tilegraph_rows")
}

#[async_trait]
impl SqlRunner for PgSqlRunner {
    async fn query(&self, user: &str, sql: &str) -> Result<Vec<Row>, CoreError> {
        let mut tx = self.begin_as(user).await?;
        let values: Vec<Value> = sqlx::query_scalar(&json_rows_query(sql))
            .fetch_all(&mut *tx)
            .await
            .map_err(CoreError::dependency)?;
        tx.rollback().await.map_err(CoreError::dependency)?;
        tracing::trace!(user, rows = values.len(), "SQL query executed");

        values
            .into_iter()
            .map(|value| match value {
                Value::Object(row) => Ok(row),
                other => Err(CoreError::Dependency(format!("Expected a JSON row, got {other}"))),
            })
            .collect()
    }

    async fn columns(&self, user: &str, sql: &str) -> Result<Vec<String>, CoreError> {
        let mut tx = self.begin_as(user).await?;
        let statement = (&mut *tx).prepare(sql).await.map_err(CoreError::dependency)?;
        let columns = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        tx.rollback().await.map_err(CoreError::dependency)?;
        Ok(columns)
    }

    async fn health_check(&self) -> Result<(), CoreError> {
        crate::health_check(&self.pool)
            .await
            .map_err(CoreError::dependency)
    }
}
