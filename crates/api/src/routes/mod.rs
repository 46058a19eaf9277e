pub mod cache;
pub mod health;
pub mod invalidations;
pub mod maps;
pub mod tiles;

use std::sync::Arc;

use axum::http::header::{CACHE_CONTROL, LAST_MODIFIED};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::routing::{get, post};
use axum::Router;
use tilegraph_core::affected_tables::AffectedTables;
use tilegraph_core::headers::{http_date, CacheControlPolicy, SURROGATE_KEY, X_CACHE_CHANNEL};
use tilegraph_core::types::Timestamp;

use crate::map_store::StoredMap;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /map                                   resolve a map configuration (POST)
/// /map/{token}/{layer}/{z}/{x}/{y}       tile, `{y}` is `<y>.<format>` (GET)
/// /cache/stats                           tile cache statistics (GET)
/// /invalidations                         tables changed upstream (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/map", post(maps::create_map))
        .route("/map/{token}/{layer}/{z}/{x}/{y}", get(tiles::get_tile))
        .route("/cache/stats", get(cache::stats))
        .route("/invalidations", post(invalidations::invalidate))
}

/// Affected tables of a stored configuration. Failures are logged and
/// yield an empty set, so the response is still served without cache tags.
pub(crate) async fn affected_tables_for(state: &AppState, map: &StoredMap) -> Arc<AffectedTables> {
    match state.affected_tables.get_affected_tables(map).await {
        Ok(tables) => tables,
        Err(e) => {
            tracing::warn!(
                dbname = %map.dbname,
                token = %map.token,
                error = %e,
                "Failed to compute affected tables",
            );
            Arc::new(AffectedTables::default())
        }
    }
}

/// `X-Cache-Channel`, `Surrogate-Key`, `Cache-Control` and `Last-Modified`.
pub(crate) fn cache_headers(
    policy: &CacheControlPolicy,
    tables: &AffectedTables,
    now: Timestamp,
    last_modified: Timestamp,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if !tables.is_empty() {
        insert_header(&mut headers, X_CACHE_CHANNEL, &tables.cache_channel());
        insert_header(&mut headers, SURROGATE_KEY, &tables.table_tags().join(" "));
    }
    insert_header(&mut headers, CACHE_CONTROL.as_str(), &policy.header_value(tables, now));
    insert_header(&mut headers, LAST_MODIFIED.as_str(), &http_date(last_modified));
    headers
}

/// Insert, replacing any previous value. Names or values that are not
/// valid in a header are skipped.
pub(crate) fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => tracing::debug!(name, "Skipping invalid response header"),
    }
}
