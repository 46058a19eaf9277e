//! Immutable analysis DAG.
//!
//! Nodes live in an arena owned by the [`AnalysisGraph`]; a node refers to
//! its inputs by [`NodeIndex`], never the reverse. Nodes can only be added
//! after all of their inputs, so the arena order is a topological order and
//! cycles cannot be expressed.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use tilegraph_core::affected_tables::AffectedTables;
use tilegraph_core::filter::Filter;
use tilegraph_core::mapconfig::AnalysisDefinition;

use crate::error::PipelineError;

/// Node type of raw data sources.
pub const SOURCE_NODE_TYPE: &str = "source";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(usize);

impl NodeIndex {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Which of a node's own filters to apply when resolving its query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FilterSelection {
    #[default]
    All,
    /// Every filter except the named ones.
    Except(Vec<String>),
    Nothing,
}

impl FilterSelection {
    pub fn except(name: impl Into<String>) -> Self {
        Self::Except(vec![name.into()])
    }

    pub fn applies(&self, filter_name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Except(skipped) => !skipped.iter().any(|s| s == filter_name),
            Self::Nothing => false,
        }
    }
}

/// Everything needed to add a node to a graph.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: Option<String>,
    pub kind: String,
    pub inputs: Vec<NodeIndex>,
    /// The node's query before its own filters are applied.
    pub base_query: String,
    pub columns: Vec<String>,
    pub filters: IndexMap<String, Filter>,
    /// Base tables read directly by this node (source nodes only).
    pub tables: AffectedTables,
}

#[derive(Debug, Clone)]
pub struct AnalysisNode {
    id: Option<String>,
    kind: String,
    inputs: Vec<NodeIndex>,
    base_query: String,
    columns: Vec<String>,
    filters: IndexMap<String, Filter>,
    tables: AffectedTables,
}

impl AnalysisNode {
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn is_source(&self) -> bool {
        self.kind == SOURCE_NODE_TYPE
    }

    pub fn inputs(&self) -> &[NodeIndex] {
        &self.inputs
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn filters(&self) -> &IndexMap<String, Filter> {
        &self.filters
    }

    /// Query with the selected subset of this node's filters applied.
    pub fn query(&self, selection: &FilterSelection) -> String {
        self.filters
            .iter()
            .filter(|(name, _)| selection.applies(name))
            .fold(self.base_query.clone(), |sql, (_, filter)| filter.apply(&sql))
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisGraph {
    definition: AnalysisDefinition,
    nodes: Vec<AnalysisNode>,
    by_id: HashMap<String, NodeIndex>,
    root: NodeIndex,
}

impl AnalysisGraph {
    /// Start building a graph for `definition`.
    pub fn builder(definition: &AnalysisDefinition) -> GraphBuilder {
        GraphBuilder {
            definition: definition.clone(),
            nodes: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    /// The definition the graph was built from.
    pub fn definition(&self) -> &AnalysisDefinition {
        &self.definition
    }

    pub fn root(&self) -> NodeIndex {
        self.root
    }

    pub fn node(&self, index: NodeIndex) -> &AnalysisNode {
        &self.nodes[index.0]
    }

    pub fn find(&self, id: &str) -> Option<NodeIndex> {
        self.by_id.get(id).copied()
    }

    /// Nodes in topological order: every node after its inputs.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &AnalysisNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeIndex(i), n))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// `index` and all of its transitive inputs matching `predicate`,
    /// depth-first in input order, each node at most once.
    pub fn ancestors<F>(&self, index: NodeIndex, predicate: F) -> Vec<NodeIndex>
    where
        F: Fn(&AnalysisNode) -> bool,
    {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        let mut stack = vec![index];

        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            let node = self.node(current);
            if predicate(node) {
                found.push(current);
            }
            stack.extend(node.inputs.iter().rev().copied());
        }
        found
    }

    /// Resolved query of a node under a filter selection.
    pub fn query(&self, index: NodeIndex, selection: &FilterSelection) -> String {
        self.node(index).query(selection)
    }

    /// Base tables the node ultimately reads: the union of its `source`
    /// ancestors' tables, in discovery order.
    pub fn affected_tables(&self, index: NodeIndex) -> AffectedTables {
        self.ancestors(index, AnalysisNode::is_source)
            .into_iter()
            .flat_map(|i| self.node(i).tables.iter().cloned())
            .collect()
    }

    /// The graph's definition with `filters` merged into node `node_id`.
    /// The graph itself is unchanged.
    pub fn definition_with(
        &self,
        node_id: &str,
        filters: &IndexMap<String, Filter>,
    ) -> AnalysisDefinition {
        self.definition.with_filters(node_id, filters)
    }
}

/// Incrementally assembles an [`AnalysisGraph`].
pub struct GraphBuilder {
    definition: AnalysisDefinition,
    nodes: Vec<AnalysisNode>,
    by_id: HashMap<String, NodeIndex>,
}

impl GraphBuilder {
    /// Index of an already-added node with this id.
    pub fn find(&self, id: &str) -> Option<NodeIndex> {
        self.by_id.get(id).copied()
    }

    pub fn node(&self, index: NodeIndex) -> &AnalysisNode {
        &self.nodes[index.0]
    }

    /// Resolved query of an already-added node.
    pub fn query(&self, index: NodeIndex, selection: &FilterSelection) -> String {
        self.node(index).query(selection)
    }

    /// Add a node whose inputs have all been added already.
    pub fn push(&mut self, spec: NodeSpec) -> Result<NodeIndex, PipelineError> {
        if spec.kind == SOURCE_NODE_TYPE && !spec.inputs.is_empty() {
            return Err(PipelineError::analysis(
                spec.id.as_deref(),
                &spec.kind,
                "source nodes cannot have inputs",
            ));
        }
        if let Some(bad) = spec.inputs.iter().find(|i| i.0 >= self.nodes.len()) {
            return Err(PipelineError::analysis(
                spec.id.as_deref(),
                &spec.kind,
                format!("unknown input node #{}", bad.0),
            ));
        }
        if let Some(id) = &spec.id {
            if self.by_id.contains_key(id) {
                return Err(PipelineError::analysis(
                    Some(id),
                    &spec.kind,
                    "node id declared more than once with different definitions",
                ));
            }
        }

        let index = NodeIndex(self.nodes.len());
        if let Some(id) = &spec.id {
            self.by_id.insert(id.clone(), index);
        }
        self.nodes.push(AnalysisNode {
            id: spec.id,
            kind: spec.kind,
            inputs: spec.inputs,
            base_query: spec.base_query,
            columns: spec.columns,
            filters: spec.filters,
            tables: spec.tables,
        });
        Ok(index)
    }

    /// Finish the graph with `root` as its output node.
    pub fn finish(self, root: NodeIndex) -> Result<AnalysisGraph, PipelineError> {
        if root.0 >= self.nodes.len() {
            return Err(PipelineError::analysis(
                self.definition.id.as_deref(),
                &self.definition.kind,
                "root node was never added",
            ));
        }
        Ok(AnalysisGraph {
            definition: self.definition,
            nodes: self.nodes,
            by_id: self.by_id,
            root,
        })
    }
}
