//! Resolution stages, in the order [`Pipeline::resolve`](crate::Pipeline::resolve)
//! runs them.
//!
//! Each stage is a plain function over the configuration. Stages that can
//! fail return every problem they found, not just the first.

pub mod buffer_size;
pub mod dataviews;
pub mod filters;
pub mod layers;
pub mod materialize;
pub mod registry;
pub mod validate;

use std::collections::HashMap;
use std::sync::Arc;

use tilegraph_core::tables::quote_identifier_if_needed;

use crate::graph::{AnalysisGraph, AnalysisNode, FilterSelection, NodeIndex};

/// Columns reserved by the renderer; re-derived by the rendering projection.
const SKIP_COLUMNS: &[&str] = &["the_geom", "the_geom_webmercator"];

/// Node lookup across every materialized graph, by node id.
///
/// When several graphs declare the same id, the last graph wins.
pub struct SourceIndex<'a> {
    graphs: &'a [Arc<AnalysisGraph>],
    by_id: HashMap<&'a str, (usize, NodeIndex)>,
}

impl<'a> SourceIndex<'a> {
    pub fn new(graphs: &'a [Arc<AnalysisGraph>]) -> Self {
        let mut by_id = HashMap::new();
        for (graph_index, graph) in graphs.iter().enumerate() {
            for (node_index, node) in graph.nodes() {
                if let Some(id) = node.id() {
                    by_id.insert(id, (graph_index, node_index));
                }
            }
        }
        Self { graphs, by_id }
    }

    pub fn resolve(&self, source_id: &str) -> Option<(&'a Arc<AnalysisGraph>, NodeIndex)> {
        self.by_id
            .get(source_id)
            .map(|(graph_index, node)| (&self.graphs[*graph_index], *node))
    }
}

/// The query a layer or dataview renders from a node: source nodes pass
/// through, everything else is reprojected for the renderer.
pub fn rendering_query(node: &AnalysisNode, selection: &FilterSelection) -> String {
    let sql = node.query(selection);
    if node.is_source() {
        return sql;
    }
    let mut columns = vec!["ST_Transform(the_geom, 3857) the_geom_webmercator".to_string()];
    columns.extend(
        node.columns()
            .iter()
            .filter(|c| !SKIP_COLUMNS.contains(&c.as_str()))
            .map(|c| quote_identifier_if_needed(c)),
    );
    format!(
        "SELECT {}\nFROM ({sql}) _cdb_analysis_query",
        columns.join(", ")
    )
}
