//! Tiles served through the in-process tile cache.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header::{CONTENT_TYPE, IF_MODIFIED_SINCE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use tilegraph_cache::CacheLookup;
use tilegraph_core::capability::TileRequest;
use tilegraph_core::error::CoreError;
use tilegraph_core::headers::{parse_http_date, X_CACHE_HIT};
use tokio::time::Instant;

use crate::error::{AppError, AppResult};
use crate::routes::{affected_tables_for, cache_headers, insert_header};
use crate::state::AppState;

/// GET /api/v1/map/{token}/{layer}/{z}/{x}/{y}
pub async fn get_tile(
    State(state): State<AppState>,
    Path((token, layer, z, x, y)): Path<(String, String, u32, u32, String)>,
    request_headers: HeaderMap,
) -> AppResult<Response> {
    let map = state.maps.get(&token).ok_or_else(|| CoreError::NotFound {
        entity: "Map",
        id: token.clone(),
    })?;
    check_layers(&layer, map.config.layers.len())?;
    let (y, format) = parse_y_format(&y)?;

    let tile = TileRequest {
        layer,
        z,
        x,
        y,
        format,
    };
    let key = tile.fingerprint(&map.dbname, &map.token);
    let if_modified_since = request_headers
        .get(IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date);

    let tables = affected_tables_for(&state, &map).await;
    let policy = &state.config.cache_control;
    let now = Utc::now();

    match state.tile_cache.lookup(&key, if_modified_since).await {
        CacheLookup::Hit(cached) => {
            let mut headers = cache_headers(policy, &tables, now, cached.last_modified);
            for (name, value) in &cached.headers {
                insert_header(&mut headers, name, value);
            }
            return Ok((StatusCode::OK, headers, cached.tile).into_response());
        }
        CacheLookup::NotModified { last_modified } => {
            let headers = cache_headers(policy, &tables, now, last_modified);
            return Ok((StatusCode::NOT_MODIFIED, headers).into_response());
        }
        CacheLookup::Miss => {}
    }

    let started = Instant::now();
    let rendered = state.renderer.render(&map.config, &tile).await?;
    let render_time = started.elapsed();

    tracing::debug!(
        key = %key,
        bytes = rendered.body.len(),
        render_ms = render_time.as_millis() as u64,
        "Tile rendered",
    );

    let stored = vec![(CONTENT_TYPE.as_str().to_string(), rendered.content_type.clone())];
    state.tile_cache.store(
        &key,
        rendered.body.clone(),
        stored,
        render_time,
        Arc::clone(&tables),
    );

    let mut headers = cache_headers(policy, &tables, now, now);
    insert_header(&mut headers, CONTENT_TYPE.as_str(), &rendered.content_type);
    insert_header(&mut headers, X_CACHE_HIT, "false");
    Ok((StatusCode::OK, headers, rendered.body).into_response())
}

/// Split `<y>.<format>`; the format may itself contain dots (`grid.json`).
fn parse_y_format(raw: &str) -> Result<(u32, String), AppError> {
    let (y, format) = raw
        .split_once('.')
        .filter(|(_, format)| !format.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("Tile `{raw}` has no format extension")))?;
    let y = y
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid tile row `{y}`")))?;
    Ok((y, format.to_string()))
}

/// Numeric layer selectors (`0`, `0,2`) must name existing layers; other
/// selectors are left to the renderer.
fn check_layers(selector: &str, layer_count: usize) -> Result<(), AppError> {
    for part in selector.split(',') {
        if let Ok(index) = part.trim().parse::<usize>() {
            if index >= layer_count {
                return Err(AppError::BadRequest(format!(
                    "Layer {index} does not exist, the map has {layer_count} layers"
                )));
            }
        }
    }
    Ok(())
}
