//! The resolution pipeline: raw map configuration in, resolved
//! configuration plus analysis graphs and datasources out.

use std::sync::Arc;

use tilegraph_core::mapconfig::MapConfig;

use crate::builder::AnalysisBuilder;
use crate::context::{RequestParams, ResolutionContext};
use crate::datasource::DatasourceRegistry;
use crate::error::PipelineErrors;
use crate::graph::AnalysisGraph;
use crate::stages::{self, SourceIndex};

/// Output of a successful resolution. Request scoped: nothing in it is
/// shared with other requests.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub config: MapConfig,
    pub analyses: Vec<Arc<AnalysisGraph>>,
    pub registry: DatasourceRegistry,
    /// Qualified names of the tables known to feed the configuration.
    pub affected_tables: Vec<String>,
}

pub struct Pipeline {
    builder: Arc<dyn AnalysisBuilder>,
    /// Maximum analyses built at once; `0` builds all of them at once.
    analysis_parallelism: usize,
}

impl Pipeline {
    pub fn new(builder: Arc<dyn AnalysisBuilder>) -> Self {
        Self {
            builder,
            analysis_parallelism: 0,
        }
    }

    pub fn with_analysis_parallelism(mut self, parallelism: usize) -> Self {
        self.analysis_parallelism = parallelism;
        self
    }

    /// Resolve `raw` for one request.
    ///
    /// Stages run in order; the first stage that reports errors ends the
    /// resolution with all of that stage's errors.
    pub async fn resolve(
        &self,
        raw: MapConfig,
        params: &RequestParams,
        ctx: &ResolutionContext,
    ) -> Result<Resolution, PipelineErrors> {
        let config = stages::buffer_size::apply(raw, params.buffersize.as_ref());

        stages::validate::dataviews(&config)?;
        let config = stages::filters::inject(config, &params.filters)?;

        let analyses = stages::materialize::build_graphs(
            self.builder.as_ref(),
            ctx,
            &config.analyses,
            self.analysis_parallelism,
        )
        .await?;

        let index = SourceIndex::new(&analyses);
        let config = stages::layers::rewrite(config, &index)?;
        let config = stages::dataviews::materialize(config, &index)?;
        let (registry, affected_tables) = stages::registry::build(&config, &index);

        tracing::debug!(
            dbname = %ctx.dbname,
            layers = config.layers.len(),
            analyses = analyses.len(),
            datasources = registry.len(),
            "Map configuration resolved",
        );

        Ok(Resolution {
            config,
            analyses,
            registry,
            affected_tables,
        })
    }
}
