//! Table change notifications from upstream.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tilegraph_core::error::CoreError;
use tilegraph_invalidation::commands;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InvalidationRequest {
    pub dbname: String,
    /// Bare (`places`) or qualified (`public.places`) table names.
    pub tables: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct InvalidationSummary {
    pub dbname: String,
    pub tables: Vec<String>,
    /// Configurations whose affected tables were forgotten.
    pub configurations_purged: usize,
    pub tiles_purged: usize,
    /// Purge commands handed to the downstream cache.
    pub purge_commands: usize,
}

/// POST /api/v1/invalidations
///
/// Records the change, drops dependent cache entries and asks the
/// downstream cache to purge. Downstream failures are logged and never
/// fail the request.
pub async fn invalidate(
    State(state): State<AppState>,
    Json(request): Json<InvalidationRequest>,
) -> AppResult<Json<DataResponse<InvalidationSummary>>> {
    let dbname = request.dbname.trim().to_string();
    if dbname.is_empty() {
        return Err(CoreError::Validation("`dbname` must not be empty".into()).into());
    }
    let mut tables: Vec<String> = Vec::new();
    for table in request.tables.iter().map(|t| t.trim()) {
        if !table.is_empty() && !tables.iter().any(|t| t == table) {
            tables.push(table.to_string());
        }
    }
    if tables.is_empty() {
        return Err(CoreError::Validation("`tables` must name at least one table".into()).into());
    }

    let now = Utc::now();
    let mut configurations_purged = 0;
    let mut tiles_purged = 0;
    let mut purge_commands = 0;

    for table in &tables {
        state.ledger.record(&dbname, table, now);
        configurations_purged += state
            .affected_tables
            .cache()
            .purge_table(&dbname, table)
            .len();
        tiles_purged += state.tile_cache.purge_tables(&dbname, table);

        if let Some(invalidator) = &state.invalidator {
            invalidator.send(commands::purge_table(&dbname, table));
            purge_commands += 1;
        }
    }

    tracing::info!(
        dbname = %dbname,
        tables = tables.len(),
        configurations_purged,
        tiles_purged,
        purge_commands,
        "Tables invalidated",
    );

    Ok(Json(DataResponse {
        data: InvalidationSummary {
            dbname,
            tables,
            configurations_purged,
            tiles_purged,
            purge_commands,
        },
    }))
}
