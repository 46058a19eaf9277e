//! Table invalidation and downstream purge commands.

mod common;

use axum::http::StatusCode;
use common::{
    body_json, build_test_app, build_test_app_with, fake_management_port, next_command, roads_map,
};
use serde_json::json;
use tilegraph_api::config::VarnishConfig;
use tilegraph_api::invalidator::Invalidator;
use tilegraph_invalidation::{QueueConfig, ReconnectConfig};

#[tokio::test]
async fn empty_requests_are_rejected() {
    let app = build_test_app();

    let response = app
        .post_json("/api/v1/invalidations", json!({ "dbname": "", "tables": ["roads"] }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json("/api/v1/invalidations", json!({ "dbname": "db", "tables": [" "] }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn invalidation_without_downstream_cache_still_purges_locally() {
    let app = build_test_app();
    app.create_map(roads_map()).await;
    assert_eq!(app.state.affected_tables.cache().len(), 1);

    let response = app
        .post_json(
            "/api/v1/invalidations",
            json!({ "dbname": "cartodb_user_1_db", "tables": ["public.roads", "public.roads"] }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["data"]["tables"], json!(["public.roads"]));
    assert_eq!(json["data"]["purge_commands"], 0);
    assert!(app.state.affected_tables.cache().is_empty());
    assert!(app
        .state
        .ledger
        .last_invalidated_table("cartodb_user_1_db", "public.roads")
        .is_some());
}

#[tokio::test]
async fn purge_commands_reach_the_management_port() {
    let (port, mut commands) = fake_management_port().await;
    let invalidator = Invalidator::start(&VarnishConfig {
        host: "127.0.0.1".into(),
        port,
        queue: QueueConfig::default(),
        reconnect: ReconnectConfig::default(),
        pool_size: 0,
    })
    .await
    .unwrap();
    let app = build_test_app_with(Some(invalidator));

    let response = app
        .post_json(
            "/api/v1/invalidations",
            json!({ "dbname": "cartodb_user_1_db", "tables": ["places", "roads"] }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["purge_commands"], 2);

    assert_eq!(
        next_command(&mut commands).await,
        r#"purge obj.http.X-Cache-Channel ~ "^cartodb_user_1_db:(.*places.*)|(table)$""#
    );
    assert_eq!(
        next_command(&mut commands).await,
        r#"purge obj.http.X-Cache-Channel ~ "^cartodb_user_1_db:(.*roads.*)|(table)$""#
    );

    let health = body_json(app.get("/health").await).await;
    assert_eq!(health["invalidation"]["mode"], "queue");
}

#[tokio::test]
async fn pooled_invalidation_sends_through_a_ready_connection() {
    let (port, mut commands) = fake_management_port().await;
    let invalidator = Invalidator::start(&VarnishConfig {
        host: "127.0.0.1".into(),
        port,
        queue: QueueConfig::default(),
        reconnect: ReconnectConfig::default(),
        pool_size: 2,
    })
    .await
    .unwrap();
    let app = build_test_app_with(Some(invalidator));

    app.post_json(
        "/api/v1/invalidations",
        json!({ "dbname": "cartodb_user_1_db", "tables": ["roads"] }),
    )
    .await;

    assert!(next_command(&mut commands).await.contains("(.*roads.*)"));
    let health = body_json(app.get("/health").await).await;
    assert_eq!(health["invalidation"]["mode"], "pool");
    assert_eq!(health["invalidation"]["connections"], 2);
}
