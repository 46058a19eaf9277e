//! End-to-end resolution through the pipeline with an in-memory SQL
//! capability.

mod common;

use assert_matches::assert_matches;
use serde_json::json;
use tilegraph_core::mapconfig::MapConfig;
use tilegraph_pipeline::datasource::DatasourceKind;
use tilegraph_pipeline::{PipelineError, RequestParams};

fn analysis_map() -> MapConfig {
    serde_json::from_value(json!({
        "version": "1.5.0",
        "layers": [
            { "type": "cartodb", "options": { "source": { "id": "a1" }, "cartocss": "#l{}", "cartocss_version": "2.3.0" } },
            { "type": "cartodb", "options": { "source": { "id": "a0" }, "cartocss": "#l{}", "cartocss_version": "2.3.0" } }
        ],
        "analyses": [{
            "id": "a1",
            "type": "buffer",
            "params": {
                "source": { "id": "a0", "type": "source", "params": { "query": "SELECT * FROM populated_places" } },
                "radius": 5000
            }
        }],
        "dataviews": {
            "country": { "type": "aggregation", "source": { "id": "a0" }, "options": { "column": "adm0name" } },
            "pop": { "type": "histogram", "source": { "id": "a0" }, "options": { "column": "pop_max" } }
        }
    }))
    .unwrap()
}

fn filters() -> RequestParams {
    RequestParams::from_raw(
        Some(r#"{"dataviews":{"country":{"accept":["Spain"]},"pop":{"min":100000}}}"#),
        None,
    )
}

// ---------------------------------------------------------------------------
// Idempotence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn resolving_twice_yields_identical_output() {
    let sql = common::FakeSql::new(&["populated_places"]);
    let pipeline = common::pipeline(sql);

    let first = pipeline.resolve(analysis_map(), &filters(), &common::ctx()).await.unwrap();
    let second = pipeline.resolve(analysis_map(), &filters(), &common::ctx()).await.unwrap();

    assert_eq!(first.config, second.config);
    assert_eq!(first.affected_tables, second.affected_tables);
    assert_eq!(first.affected_tables, vec!["public.populated_places"]);
}

// ---------------------------------------------------------------------------
// Filters from two dataviews on one node
// ---------------------------------------------------------------------------

#[tokio::test]
async fn both_dataview_filters_reach_the_shared_node() {
    let sql = common::FakeSql::new(&["populated_places"]);
    let resolution = common::pipeline(sql)
        .resolve(analysis_map(), &filters(), &common::ctx())
        .await
        .unwrap();

    let graph = &resolution.analyses[0];
    let a0 = graph.node(graph.find("a0").unwrap());
    assert_eq!(a0.filters().keys().collect::<Vec<_>>(), vec!["country", "pop"]);

    let country = &resolution.config.dataviews["country"];
    let sql = country.sql.as_ref().unwrap();
    assert!(sql.own_filter_on.contains("adm0name IN ('Spain')"));
    assert!(sql.own_filter_on.contains("pop_max >= 100000"));
    assert!(!sql.own_filter_off.contains("adm0name IN ('Spain')"));
    assert!(sql.own_filter_off.contains("pop_max >= 100000"));
    assert_eq!(sql.no_filters, "SELECT * FROM populated_places");
    assert_eq!(country.node.as_ref().unwrap().kind, "source");
}

// ---------------------------------------------------------------------------
// Layer rewriting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transform_layers_are_wrapped_and_source_layers_pass_through() {
    let sql = common::FakeSql::new(&["populated_places"]);
    let resolution = common::pipeline(sql)
        .resolve(analysis_map(), &RequestParams::default(), &common::ctx())
        .await
        .unwrap();

    let buffer_layer = &resolution.config.layers[0].options;
    let layer_sql = buffer_layer.sql.as_deref().unwrap();
    assert!(layer_sql.starts_with(
        "SELECT ST_Transform(the_geom, 3857) the_geom_webmercator, cartodb_id, adm0name, pop_max\nFROM ("
    ));
    assert!(layer_sql.contains("ST_Buffer(_input.the_geom::geography, 5000)"));
    assert!(layer_sql.ends_with(") _cdb_analysis_query"));
    assert_eq!(buffer_layer.affected_tables, vec!["public.populated_places"]);
    assert!(buffer_layer.columns.is_empty());

    let source_layer = &resolution.config.layers[1].options;
    assert_eq!(source_layer.sql.as_deref(), Some("SELECT * FROM populated_places"));
    assert_eq!(source_layer.columns, vec!["adm0name", "pop_max"]);

    assert_eq!(
        resolution.registry.for_layer(0).map(|d| d.kind()),
        Some(DatasourceKind::Analysis)
    );
    // Layer 1 and both dataviews share node a0.
    assert_eq!(resolution.registry.len(), 2);
}

#[tokio::test]
async fn sql_wrap_keeps_the_raw_query() {
    let mut map = analysis_map();
    map.layers[1].options.sql_wrap = Some("SELECT * FROM (<%= sql %>) w WHERE true".into());

    let resolution = common::pipeline(common::FakeSql::new(&["populated_places"]))
        .resolve(map, &RequestParams::default(), &common::ctx())
        .await
        .unwrap();

    let options = &resolution.config.layers[1].options;
    assert_eq!(options.sql_raw.as_deref(), Some("SELECT * FROM populated_places"));
    assert_eq!(
        options.sql.as_deref(),
        Some("SELECT * FROM (SELECT * FROM populated_places) w WHERE true")
    );
}

#[tokio::test]
async fn plain_sql_layers_become_query_datasources() {
    let map: MapConfig = serde_json::from_value(json!({
        "layers": [{ "type": "cartodb", "options": { "sql": "SELECT * FROM t", "sql_wrap": "SELECT 1 FROM (<%= sql %>) q" } }]
    }))
    .unwrap();
    let sql = common::FakeSql::new(&[]);
    let resolution = common::pipeline(sql.clone())
        .resolve(map, &RequestParams::default(), &common::ctx())
        .await
        .unwrap();

    let options = &resolution.config.layers[0].options;
    assert_eq!(options.sql.as_deref(), Some("SELECT 1 FROM (SELECT * FROM t) q"));
    assert_eq!(options.sql_raw.as_deref(), Some("SELECT * FROM t"));
    assert_eq!(
        resolution.registry.for_layer(0).map(|d| d.kind()),
        Some(DatasourceKind::Query)
    );
    assert_eq!(sql.calls(), 0);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_layer_node_reports_layer_and_id() {
    let map: MapConfig = serde_json::from_value(json!({
        "layers": [{ "type": "cartodb", "options": { "source": { "id": "a1" } } }]
    }))
    .unwrap();

    let errors = common::pipeline(common::FakeSql::new(&[]))
        .resolve(map, &RequestParams::default(), &common::ctx())
        .await
        .unwrap_err();

    assert_eq!(errors.len(), 1);
    assert_matches!(
        errors.iter().next().unwrap(),
        PipelineError::MissingLayerNode { layer_index: 0, source_id } if source_id == "a1"
    );
    assert!(errors.all_validation());
}

#[tokio::test]
async fn every_missing_layer_node_is_collected() {
    let mut map = analysis_map();
    map.layers[0].options.source = Some(tilegraph_core::mapconfig::SourceRef::new("x"));
    map.layers[1].options.source = Some(tilegraph_core::mapconfig::SourceRef::new("y"));

    let errors = common::pipeline(common::FakeSql::new(&["populated_places"]))
        .resolve(map, &RequestParams::default(), &common::ctx())
        .await
        .unwrap_err();
    assert_eq!(errors.len(), 2);
}

#[tokio::test]
async fn missing_dataview_node_is_fatal() {
    let mut map = analysis_map();
    map.dataviews["pop"].source = Some(tilegraph_core::mapconfig::SourceRef::new("nope"));

    let errors = common::pipeline(common::FakeSql::new(&["populated_places"]))
        .resolve(map, &RequestParams::default(), &common::ctx())
        .await
        .unwrap_err();
    assert_matches!(
        errors.iter().next().unwrap(),
        PipelineError::MissingDataviewNode { dataview, .. } if dataview == "pop"
    );
}

#[tokio::test]
async fn invalid_dataviews_stop_before_any_analysis_work() {
    let mut map = analysis_map();
    map.dataviews["pop"].kind = None;
    map.dataviews["country"].source = None;

    let sql = common::FakeSql::new(&["populated_places"]);
    let errors = common::pipeline(sql.clone())
        .resolve(map, &RequestParams::default(), &common::ctx())
        .await
        .unwrap_err();

    assert_eq!(errors.len(), 2);
    assert_eq!(sql.calls(), 0);
}

#[tokio::test]
async fn unsupported_analysis_type_fails_resolution() {
    let mut map = analysis_map();
    map.analyses[0].kind = "kmeans".into();

    let errors = common::pipeline(common::FakeSql::new(&["populated_places"]))
        .resolve(map, &RequestParams::default(), &common::ctx())
        .await
        .unwrap_err();
    assert_matches!(
        errors.iter().next().unwrap(),
        PipelineError::Analysis { analysis_id: Some(id), .. } if id == "a1"
    );
}
