//! Where a layer or dataview gets its data from.
//!
//! A [`Datasource`] is either a literal SQL query or a node of a
//! materialized analysis graph. Both answer the same questions (id, query,
//! columns, filters, affected tables); analysis datasources delegate every
//! answer to their node.

use std::sync::Arc;

use indexmap::IndexMap;
use tilegraph_core::affected_tables::AffectedTables;
use tilegraph_core::filter::Filter;
use tilegraph_core::hashing::sha256_hex;

use crate::graph::{AnalysisGraph, AnalysisNode, FilterSelection, NodeIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasourceKind {
    Query,
    Analysis,
}

#[derive(Debug, Clone)]
pub enum Datasource {
    Query { id: String, sql: String },
    Analysis {
        id: String,
        graph: Arc<AnalysisGraph>,
        node: NodeIndex,
    },
}

impl Datasource {
    pub fn from_query(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        Self::Query {
            id: sha256_hex(format!("query:{sql}").as_bytes()),
            sql,
        }
    }

    /// Datasource backed by `node` of `graph`. The id derives from the
    /// node id, or from the node's unfiltered query when it has none.
    pub fn from_node(graph: Arc<AnalysisGraph>, node: NodeIndex) -> Self {
        let identity = match graph.node(node).id() {
            Some(node_id) => format!("node:{node_id}"),
            None => format!("query:{}", graph.query(node, &FilterSelection::Nothing)),
        };
        Self::Analysis {
            id: sha256_hex(identity.as_bytes()),
            graph,
            node,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Query { id, .. } | Self::Analysis { id, .. } => id,
        }
    }

    pub fn kind(&self) -> DatasourceKind {
        match self {
            Self::Query { .. } => DatasourceKind::Query,
            Self::Analysis { .. } => DatasourceKind::Analysis,
        }
    }

    /// The datasource query. Query datasources ignore the selection.
    pub fn query(&self, selection: &FilterSelection) -> String {
        match self {
            Self::Query { sql, .. } => sql.clone(),
            Self::Analysis { graph, node, .. } => graph.query(*node, selection),
        }
    }

    pub fn columns(&self) -> Vec<String> {
        match self {
            Self::Query { .. } => Vec::new(),
            Self::Analysis { graph, node, .. } => graph.node(*node).columns().to_vec(),
        }
    }

    pub fn filters(&self) -> IndexMap<String, Filter> {
        match self {
            Self::Query { .. } => IndexMap::new(),
            Self::Analysis { graph, node, .. } => graph.node(*node).filters().clone(),
        }
    }

    /// Tables known at resolution time. Query datasources report none;
    /// theirs are discovered later from the final SQL.
    pub fn affected_tables(&self) -> AffectedTables {
        match self {
            Self::Query { .. } => AffectedTables::default(),
            Self::Analysis { graph, node, .. } => graph.affected_tables(*node),
        }
    }

    /// The backing node, for analysis datasources.
    pub fn node(&self) -> Option<&AnalysisNode> {
        match self {
            Self::Query { .. } => None,
            Self::Analysis { graph, node, .. } => Some(graph.node(*node)),
        }
    }
}

/// Per-request map of datasource id to datasource, plus which datasource
/// each layer and dataview uses.
#[derive(Debug, Clone, Default)]
pub struct DatasourceRegistry {
    sources: IndexMap<String, Datasource>,
    layers: IndexMap<usize, String>,
    dataviews: IndexMap<String, String>,
}

impl DatasourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a datasource, reusing an existing one with the same id.
    /// Returns the id.
    pub fn add(&mut self, datasource: Datasource) -> String {
        let id = datasource.id().to_string();
        self.sources.entry(id.clone()).or_insert(datasource);
        id
    }

    pub fn assign_layer(&mut self, layer_index: usize, datasource: Datasource) -> String {
        let id = self.add(datasource);
        self.layers.insert(layer_index, id.clone());
        id
    }

    pub fn assign_dataview(&mut self, name: &str, datasource: Datasource) -> String {
        let id = self.add(datasource);
        self.dataviews.insert(name.to_string(), id.clone());
        id
    }

    pub fn get(&self, id: &str) -> Option<&Datasource> {
        self.sources.get(id)
    }

    /// The analysis datasource backed by the node with id `source_id`.
    pub fn get_for_node(&self, source_id: &str) -> Option<&Datasource> {
        self.sources
            .values()
            .find(|ds| ds.node().and_then(AnalysisNode::id) == Some(source_id))
    }

    pub fn for_layer(&self, layer_index: usize) -> Option<&Datasource> {
        self.layers.get(&layer_index).and_then(|id| self.get(id))
    }

    pub fn for_dataview(&self, name: &str) -> Option<&Datasource> {
        self.dataviews.get(name).and_then(|id| self.get(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Datasource> {
        self.sources.values()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
