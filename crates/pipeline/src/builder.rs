//! Turning analysis definitions into [`AnalysisGraph`]s.
//!
//! [`AnalysisBuilder`] is the seam to the analysis backend. The bundled
//! [`SqlAnalysisBuilder`] supports the node types needed to serve maps
//! from plain SQL sources and delegates introspection to a [`SqlRunner`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tilegraph_core::affected_tables::AffectedTables;
use tilegraph_core::capability::SqlRunner;
use tilegraph_core::mapconfig::AnalysisDefinition;
use tilegraph_core::query::{affected_tables_query, limited_query, substitute_dummy_tokens};
use tilegraph_core::tables::quote_identifier_if_needed;

use crate::context::ResolutionContext;
use crate::error::PipelineError;
use crate::graph::{AnalysisGraph, FilterSelection, GraphBuilder, NodeIndex, NodeSpec, SOURCE_NODE_TYPE};

/// Geometry column every node is expected to expose.
pub const GEOMETRY_COLUMN: &str = "the_geom";

/// Builds one graph per top-level analysis definition.
#[async_trait]
pub trait AnalysisBuilder: Send + Sync {
    async fn build(
        &self,
        ctx: &ResolutionContext,
        definition: &AnalysisDefinition,
    ) -> Result<AnalysisGraph, PipelineError>;
}

/// Reference builder: `source`, `buffer` and `point-in-polygon` nodes.
pub struct SqlAnalysisBuilder {
    sql: Arc<dyn SqlRunner>,
}

impl SqlAnalysisBuilder {
    pub fn new(sql: Arc<dyn SqlRunner>) -> Self {
        Self { sql }
    }
}

#[async_trait]
impl AnalysisBuilder for SqlAnalysisBuilder {
    async fn build(
        &self,
        ctx: &ResolutionContext,
        definition: &AnalysisDefinition,
    ) -> Result<AnalysisGraph, PipelineError> {
        let mut state = BuildState {
            graph: AnalysisGraph::builder(definition),
            seen: HashMap::new(),
        };
        let root = self
            .build_node(ctx, definition, &mut state)
            .await
            .map_err(|e| e.in_analysis(definition.id.as_deref()))?;

        tracing::debug!(
            analysis_id = definition.id.as_deref().unwrap_or("<anonymous>"),
            root_type = %definition.kind,
            "Analysis graph built",
        );
        state.graph.finish(root)
    }
}

struct BuildState {
    graph: GraphBuilder,
    /// Definitions already added, by node id.
    seen: HashMap<String, AnalysisDefinition>,
}

impl SqlAnalysisBuilder {
    /// Add `def` and, first, all of its inputs. A node referenced twice
    /// with an identical definition is added once.
    fn build_node<'a>(
        &'a self,
        ctx: &'a ResolutionContext,
        def: &'a AnalysisDefinition,
        state: &'a mut BuildState,
    ) -> BoxFuture<'a, Result<NodeIndex, PipelineError>> {
        Box::pin(async move {
            if let Some(id) = &def.id {
                if let (Some(previous), Some(index)) = (state.seen.get(id), state.graph.find(id)) {
                    if previous == def {
                        return Ok(index);
                    }
                }
            }

            let mut inputs = Vec::new();
            for (name, input) in def.inputs() {
                let index = self.build_node(ctx, input, state).await?;
                inputs.push((name, index));
            }

            let spec = match def.kind.as_str() {
                SOURCE_NODE_TYPE => self.source_node(ctx, def, &inputs).await?,
                "buffer" => buffer_node(def, &inputs, &state.graph)?,
                "point-in-polygon" => point_in_polygon_node(def, &inputs, &state.graph)?,
                other => {
                    return Err(PipelineError::analysis(
                        def.id.as_deref(),
                        other,
                        format!("unsupported analysis type \"{other}\""),
                    ))
                }
            };

            let index = state.graph.push(spec)?;
            if let Some(id) = &def.id {
                state.seen.insert(id.clone(), def.clone());
            }
            Ok(index)
        })
    }

    async fn source_node(
        &self,
        ctx: &ResolutionContext,
        def: &AnalysisDefinition,
        inputs: &[(&str, NodeIndex)],
    ) -> Result<NodeSpec, PipelineError> {
        if !inputs.is_empty() {
            return Err(PipelineError::analysis(
                def.id.as_deref(),
                &def.kind,
                "source nodes cannot have inputs",
            ));
        }
        let query = def
            .param_value("query")
            .and_then(|v| v.as_str())
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| {
                PipelineError::analysis(def.id.as_deref(), &def.kind, "missing required param `query`")
            })?;

        let columns = self
            .sql
            .columns(&ctx.user, &limited_query(&substitute_dummy_tokens(query), 0))
            .await?;
        let rows = self.sql.query(&ctx.user, &affected_tables_query(query)).await?;
        let tables = AffectedTables::from_rows(&rows)?;

        Ok(NodeSpec {
            id: def.id.clone(),
            kind: def.kind.clone(),
            inputs: Vec::new(),
            base_query: query.to_string(),
            columns,
            filters: def.filters.clone(),
            tables,
        })
    }
}

fn required_input(
    def: &AnalysisDefinition,
    inputs: &[(&str, NodeIndex)],
    name: &str,
) -> Result<NodeIndex, PipelineError> {
    inputs
        .iter()
        .find(|(param, _)| *param == name)
        .map(|(_, index)| *index)
        .ok_or_else(|| {
            PipelineError::analysis(
                def.id.as_deref(),
                &def.kind,
                format!("missing required input `{name}`"),
            )
        })
}

fn non_geometry_columns(columns: &[String]) -> Vec<String> {
    columns
        .iter()
        .filter(|c| c.as_str() != GEOMETRY_COLUMN)
        .cloned()
        .collect()
}

fn projection(columns: &[String], qualifier: &str) -> Vec<String> {
    columns
        .iter()
        .map(|c| format!("{qualifier}.{}", quote_identifier_if_needed(c)))
        .collect()
}

fn buffer_node(
    def: &AnalysisDefinition,
    inputs: &[(&str, NodeIndex)],
    graph: &GraphBuilder,
) -> Result<NodeSpec, PipelineError> {
    let source = required_input(def, inputs, "source")?;
    let radius = def
        .param_value("radius")
        .and_then(|v| v.as_f64())
        .filter(|r| r.is_finite() && *r >= 0.0)
        .ok_or_else(|| {
            PipelineError::analysis(def.id.as_deref(), &def.kind, "param `radius` must be a non-negative number")
        })?;

    let input = graph.node(source);
    let mut select = projection(&non_geometry_columns(input.columns()), "_input");
    select.push(format!(
        "ST_Buffer(_input.{GEOMETRY_COLUMN}::geography, {radius})::geometry AS {GEOMETRY_COLUMN}"
    ));

    Ok(NodeSpec {
        id: def.id.clone(),
        kind: def.kind.clone(),
        inputs: vec![source],
        base_query: format!(
            "SELECT {} FROM ({}) _input",
            select.join(", "),
            graph.query(source, &FilterSelection::All)
        ),
        columns: input.columns().to_vec(),
        filters: def.filters.clone(),
        tables: AffectedTables::default(),
    })
}

fn point_in_polygon_node(
    def: &AnalysisDefinition,
    inputs: &[(&str, NodeIndex)],
    graph: &GraphBuilder,
) -> Result<NodeSpec, PipelineError> {
    let points = required_input(def, inputs, "points_source")?;
    let polygons = required_input(def, inputs, "polygons_source")?;
    let columns = graph.node(points).columns().to_vec();

    Ok(NodeSpec {
        id: def.id.clone(),
        kind: def.kind.clone(),
        inputs: vec![points, polygons],
        base_query: format!(
            "SELECT _points.* FROM ({}) _points, ({}) _polygons \
             WHERE ST_Contains(_polygons.{GEOMETRY_COLUMN}, _points.{GEOMETRY_COLUMN})",
            graph.query(points, &FilterSelection::All),
            graph.query(polygons, &FilterSelection::All),
        ),
        columns,
        filters: def.filters.clone(),
        tables: AffectedTables::default(),
    })
}
