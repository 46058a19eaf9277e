use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use tilegraph_cache::{CacheStats, SortBy};

use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    /// Include per-tile details.
    #[serde(default)]
    pub tiles: bool,
    #[serde(default)]
    pub sort_by: SortBy,
}

/// GET /api/v1/cache/stats?tiles=true&sort_by=hits
pub async fn stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Json<DataResponse<CacheStats>> {
    Json(DataResponse {
        data: state.tile_cache.stats(query.tiles, query.sort_by),
    })
}
