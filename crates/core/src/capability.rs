//! Collaborators the core delegates to: SQL execution and tile rendering.
//!
//! The core composes SQL text and resolved layer configurations; these
//! traits are the only way it reaches a database or a renderer.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::CoreError;
use crate::mapconfig::MapConfig;
use crate::types::Row;

/// Executes SQL on behalf of a database user.
#[async_trait]
pub trait SqlRunner: Send + Sync {
    /// Run `sql` as `user` and return every row.
    async fn query(&self, user: &str, sql: &str) -> Result<Vec<Row>, CoreError>;

    /// Column names `sql` would produce, without reading rows.
    async fn columns(&self, user: &str, sql: &str) -> Result<Vec<String>, CoreError>;

    /// Cheap liveness probe.
    async fn health_check(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Tile coordinates plus output format (`png`, `mvt`, `grid.json`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRequest {
    pub layer: String,
    pub z: u32,
    pub x: u32,
    pub y: u32,
    pub format: String,
}

impl TileRequest {
    /// Normalized fingerprint of the request for a given configuration.
    pub fn fingerprint(&self, dbname: &str, token: &str) -> String {
        format!(
            "{dbname}:{token}:{}:{}:{}:{}.{}",
            self.layer, self.z, self.x, self.y, self.format
        )
    }
}

/// A rendered artifact with the content type the renderer reported.
#[derive(Debug, Clone)]
pub struct RenderedTile {
    pub body: Bytes,
    pub content_type: String,
}

/// Produces tile bytes from a resolved configuration.
#[async_trait]
pub trait TileRenderer: Send + Sync {
    async fn render(&self, config: &MapConfig, tile: &TileRequest) -> Result<RenderedTile, CoreError>;
}
