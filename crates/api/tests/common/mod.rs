#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{header, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tilegraph_api::config::{FreshnessSource, ServerConfig};
use tilegraph_api::invalidator::Invalidator;
use tilegraph_api::router::build_app_router;
use tilegraph_api::state::AppState;
use tilegraph_cache::TileCacheConfig;
use tilegraph_core::capability::{RenderedTile, SqlRunner, TileRenderer, TileRequest};
use tilegraph_core::error::CoreError;
use tilegraph_core::headers::CacheControlPolicy;
use tilegraph_core::mapconfig::MapConfig;
use tilegraph_core::types::Row;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceExt;

pub const DBNAME: &str = "cartodb_user_1_db";

/// Last update reported for tables that have metadata.
pub const UPDATED_AT: &str = "2024-03-01T12:00:00+00:00";
pub const UPDATED_AT_MS: i64 = 1_709_294_400_000;

/// In-memory SQL capability. `roads` has table metadata, `places` does not.
pub struct FakeSql {
    pub calls: AtomicUsize,
    pub healthy: AtomicBool,
}

impl FakeSql {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl SqlRunner for FakeSql {
    async fn query(&self, _user: &str, sql: &str) -> Result<Vec<Row>, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let rows: Vec<Value> = [("roads", Some(UPDATED_AT)), ("places", None)]
            .into_iter()
            .filter(|(table, _)| sql.contains(&format!("FROM {table}")))
            .map(|(table, updated_at)| {
                json!({
                    "dbname": DBNAME,
                    "schema_name": "public",
                    "table_name": table,
                    "updated_at": updated_at,
                })
            })
            .collect();
        Ok(serde_json::from_value(Value::Array(rows)).unwrap())
    }

    async fn columns(&self, _user: &str, _sql: &str) -> Result<Vec<String>, CoreError> {
        Ok(["cartodb_id", "the_geom", "name"]
            .iter()
            .map(|c| c.to_string())
            .collect())
    }

    async fn health_check(&self) -> Result<(), CoreError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoreError::Dependency("connection refused".into()))
        }
    }
}

/// Renders `tile:<fingerprint-ish>` as PNG, or fails when asked to.
pub struct FakeRenderer {
    pub renders: AtomicUsize,
    pub fail: AtomicBool,
}

impl FakeRenderer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            renders: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        })
    }

    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TileRenderer for FakeRenderer {
    async fn render(&self, _config: &MapConfig, tile: &TileRequest) -> Result<RenderedTile, CoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CoreError::dependency(
                "renderer unavailable at postgres://carto:secret@db:5432/carto",
            ));
        }
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(RenderedTile {
            body: Bytes::from(format!(
                "tile:{}/{}/{}/{}.{}",
                tile.layer, tile.z, tile.x, tile.y, tile.format
            )),
            content_type: "image/png".into(),
        })
    }
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        dbname: DBNAME.to_string(),
        db_user: "cartodb_user_1".to_string(),
        renderer_url: "http://renderer.invalid".to_string(),
        tile_cache: TileCacheConfig::default(),
        freshness: FreshnessSource::Ledger,
        cache_control: CacheControlPolicy::default(),
        analysis_parallelism: 0,
        map_store_max_items: 16,
        varnish: None,
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub sql: Arc<FakeSql>,
    pub renderer: Arc<FakeRenderer>,
}

pub fn build_test_app() -> TestApp {
    build_test_app_with(None)
}

pub fn build_test_app_with(invalidator: Option<Invalidator>) -> TestApp {
    let config = test_config();
    let sql = FakeSql::new();
    let renderer = FakeRenderer::new();
    let state = AppState::new(config.clone(), sql.clone(), renderer.clone(), invalidator).unwrap();
    TestApp {
        router: build_app_router(state.clone(), &config),
        state,
        sql,
        renderer,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> Response {
        self.send(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// Register `config` and return its token.
    pub async fn create_map(&self, config: Value) -> String {
        let response = self.post_json("/api/v1/map", config).await;
        assert_eq!(response.status(), 200);
        let json = body_json(response).await;
        let layergroupid = json["data"]["layergroupid"].as_str().unwrap().to_string();
        layergroupid.split(':').next().unwrap().to_string()
    }
}

pub async fn body_bytes(response: Response) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

/// One layer reading `roads` through a source analysis.
pub fn roads_map() -> Value {
    json!({
        "version": "1.5.0",
        "layers": [{
            "type": "cartodb",
            "options": { "source": { "id": "a0" }, "cartocss": "#l{}", "cartocss_version": "2.3.0" }
        }],
        "analyses": [{
            "id": "a0",
            "type": "source",
            "params": { "query": "SELECT * FROM roads" }
        }]
    })
}

/// One plain SQL layer reading `places`, which has no table metadata.
pub fn places_map() -> Value {
    json!({
        "version": "1.5.0",
        "layers": [{
            "type": "cartodb",
            "options": { "sql": "SELECT * FROM places", "cartocss": "#l{}", "cartocss_version": "2.3.0" }
        }]
    })
}

/// Minimal management port: sends the banner, records every command and
/// answers `200`.
pub async fn fake_management_port() -> (u16, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let (read_half, mut write_half) = stream.into_split();
                write_half.write_all(b"200 5\nready\n").await.unwrap();
                let mut lines = BufReader::new(read_half).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let _ = tx.send(line);
                    if write_half.write_all(b"200 2\nOK\n").await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    (port, rx)
}

pub async fn next_command(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a purge command")
        .expect("management port closed")
}
