//! Map configuration resolution.

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tilegraph_core::headers::last_modified;
use tilegraph_core::mapconfig::MapConfig;
use tilegraph_pipeline::datasource::Datasource;
use tilegraph_pipeline::{RequestParams, Resolution};

use crate::error::AppResult;
use crate::map_store::StoredMap;
use crate::response::DataResponse;
use crate::routes::{affected_tables_for, cache_headers};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct MapQuery {
    /// JSON-encoded per-request filters.
    pub filters: Option<String>,
    /// JSON-encoded buffer-size overrides by format.
    pub buffersize: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MapCreated {
    /// `<token>:<last updated, epoch millis>`.
    pub layergroupid: String,
    pub last_updated: String,
    pub metadata: MapMetadata,
}

#[derive(Debug, Serialize)]
pub struct MapMetadata {
    pub layers: Vec<LayerMetadata>,
    pub dataviews: Vec<DataviewMetadata>,
    pub analyses: Vec<AnalysisMetadata>,
}

#[derive(Debug, Serialize)]
pub struct LayerMetadata {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub columns: Vec<String>,
    pub affected_tables: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DataviewMetadata {
    pub id: String,
    pub datasource: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalysisMetadata {
    pub id: Option<String>,
    pub nodes: Vec<NodeMetadata>,
}

#[derive(Debug, Serialize)]
pub struct NodeMetadata {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
}

/// POST /api/v1/map -- resolve and register a map configuration.
pub async fn create_map(
    State(state): State<AppState>,
    Query(query): Query<MapQuery>,
    Json(raw): Json<MapConfig>,
) -> AppResult<Response> {
    let params = RequestParams::from_raw(query.filters.as_deref(), query.buffersize.as_deref());
    let ctx = state.resolution_context();

    let resolution = state.pipeline.resolve(raw, &params, &ctx).await?;
    let token = resolution.config.id()?;
    let metadata = metadata(&resolution);

    let now = Utc::now();
    let map = state.maps.insert(StoredMap {
        dbname: ctx.dbname,
        user: ctx.user,
        token,
        config: resolution.config,
        created_at: now,
    });

    let tables = affected_tables_for(&state, &map).await;
    let updated = last_modified(&tables, now);
    let headers = cache_headers(&state.config.cache_control, &tables, now, updated);

    tracing::info!(
        dbname = %map.dbname,
        token = %map.token,
        layers = metadata.layers.len(),
        affected_tables = tables.len(),
        "Map configuration registered",
    );

    let body = MapCreated {
        layergroupid: format!("{}:{}", map.token, updated.timestamp_millis()),
        last_updated: updated.to_rfc3339_opts(SecondsFormat::Millis, true),
        metadata,
    };
    Ok((headers, Json(DataResponse { data: body })).into_response())
}

fn metadata(resolution: &Resolution) -> MapMetadata {
    let layers = resolution
        .config
        .layers
        .iter()
        .map(|layer| LayerMetadata {
            id: layer.id.clone(),
            kind: layer.kind.clone(),
            columns: layer.options.columns.clone(),
            affected_tables: layer.options.affected_tables.clone(),
        })
        .collect();

    let dataviews = resolution
        .config
        .dataviews
        .keys()
        .map(|name| DataviewMetadata {
            id: name.clone(),
            datasource: resolution
                .registry
                .for_dataview(name)
                .map(|ds: &Datasource| ds.id().to_string()),
        })
        .collect();

    let analyses = resolution
        .analyses
        .iter()
        .map(|graph| AnalysisMetadata {
            id: graph.definition().id.clone(),
            nodes: graph
                .nodes()
                .map(|(_, node)| NodeMetadata {
                    id: node.id().map(str::to_string),
                    kind: node.kind().to_string(),
                })
                .collect(),
        })
        .collect();

    MapMetadata {
        layers,
        dataviews,
        analyses,
    }
}
