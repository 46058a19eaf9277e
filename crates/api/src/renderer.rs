//! [`TileRenderer`] that forwards resolved configurations to an external
//! rendering service over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tilegraph_core::capability::{RenderedTile, TileRenderer, TileRequest};
use tilegraph_core::error::CoreError;
use tilegraph_core::mapconfig::MapConfig;

const RENDER_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpTileRenderer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTileRenderer {
    pub fn new(base_url: impl Into<String>) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(RENDER_TIMEOUT)
            .build()
            .map_err(|e| CoreError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn tile_url(&self, tile: &TileRequest) -> String {
        format!(
            "{}/render/{}/{}/{}/{}.{}",
            self.base_url, tile.layer, tile.z, tile.x, tile.y, tile.format
        )
    }
}

#[async_trait]
impl TileRenderer for HttpTileRenderer {
    async fn render(&self, config: &MapConfig, tile: &TileRequest) -> Result<RenderedTile, CoreError> {
        let response = self
            .client
            .post(self.tile_url(tile))
            .json(config)
            .send()
            .await
            .map_err(CoreError::dependency)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::dependency(format!(
                "Renderer responded {status}: {body}"
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let body = response.bytes().await.map_err(CoreError::dependency)?;

        Ok(RenderedTile { body, content_type })
    }
}
