use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use tilegraph_core::mapconfig::AnalysisDefinition;

use crate::builder::AnalysisBuilder;
use crate::context::ResolutionContext;
use crate::error::PipelineError;
use crate::graph::AnalysisGraph;

/// Build a graph for every definition, at most `parallelism` at a time
/// (`0` runs them all at once). Graphs come back in definition order; the
/// first failure aborts the rest.
pub async fn build_graphs(
    builder: &dyn AnalysisBuilder,
    ctx: &ResolutionContext,
    definitions: &[AnalysisDefinition],
    parallelism: usize,
) -> Result<Vec<Arc<AnalysisGraph>>, PipelineError> {
    if definitions.is_empty() {
        return Ok(Vec::new());
    }
    let width = match parallelism {
        0 => definitions.len(),
        n => n.min(definitions.len()),
    };

    let builds: Vec<_> = definitions
        .iter()
        .map(|definition| build_one(builder, ctx, definition))
        .collect();
    futures::stream::iter(builds)
        .buffered(width)
        .try_collect()
        .await
}

// Named so the future's `Send` bound is declared rather than inferred through
// a higher-ranked closure, which the compiler cannot prove in axum handlers.
fn build_one<'a>(
    builder: &'a dyn AnalysisBuilder,
    ctx: &'a ResolutionContext,
    definition: &'a AnalysisDefinition,
) -> impl std::future::Future<Output = Result<Arc<AnalysisGraph>, PipelineError>> + Send + 'a {
    async move { builder.build(ctx, definition).await.map(Arc::new) }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use indexmap::IndexMap;
    use serde_json::json;
    use tilegraph_core::affected_tables::AffectedTables;

    use super::*;
    use crate::graph::NodeSpec;

    /// Builds single-node graphs, tracking peak concurrency.
    struct CountingBuilder {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl AnalysisBuilder for CountingBuilder {
        async fn build(
            &self,
            _ctx: &ResolutionContext,
            definition: &AnalysisDefinition,
        ) -> Result<AnalysisGraph, PipelineError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if definition.kind == "broken" {
                return Err(PipelineError::analysis(
                    definition.id.as_deref(),
                    "broken",
                    "boom",
                ));
            }
            let mut builder = AnalysisGraph::builder(definition);
            let root = builder.push(NodeSpec {
                id: definition.id.clone(),
                kind: definition.kind.clone(),
                inputs: vec![],
                base_query: "SELECT 1".into(),
                columns: vec![],
                filters: IndexMap::new(),
                tables: AffectedTables::default(),
            })?;
            builder.finish(root)
        }
    }

    fn defs(kinds: &[&str]) -> Vec<AnalysisDefinition> {
        kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| {
                serde_json::from_value(json!({ "id": format!("n{i}"), "type": kind, "params": {} }))
                    .unwrap()
            })
            .collect()
    }

    fn builder() -> CountingBuilder {
        CountingBuilder {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn builds_in_definition_order() {
        let b = builder();
        let ctx = ResolutionContext::new("db", "user");
        let graphs = build_graphs(&b, &ctx, &defs(&["source", "source", "source"]), 0)
            .await
            .unwrap();
        let ids: Vec<_> = graphs
            .iter()
            .map(|g| g.definition().id.clone().unwrap())
            .collect();
        assert_eq!(ids, vec!["n0", "n1", "n2"]);
        assert_eq!(b.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn respects_parallelism_bound() {
        let b = builder();
        let ctx = ResolutionContext::new("db", "user");
        build_graphs(&b, &ctx, &defs(&["source"; 5]), 2)
            .await
            .unwrap();
        assert!(b.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn first_failure_aborts_join() {
        let b = builder();
        let ctx = ResolutionContext::new("db", "user");
        let result = build_graphs(&b, &ctx, &defs(&["source", "broken", "source"]), 0).await;
        assert_matches!(result, Err(PipelineError::Analysis { .. }));
    }
}
