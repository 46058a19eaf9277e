use std::fmt;

use tilegraph_core::error::CoreError;

/// A single problem found while resolving a map configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    /// A dataview lacks a required attribute (`source.id`, `type`).
    #[error("Dataview \"{dataview}\" is missing `{attribute}` attribute")]
    InvalidDataview {
        dataview: String,
        attribute: &'static str,
    },

    /// A layer references a node id no analysis declares.
    #[error("Missing analysis node.id=\"{source_id}\" for layer={layer_index}")]
    MissingLayerNode {
        layer_index: usize,
        source_id: String,
    },

    /// A dataview references a node id no analysis declares.
    #[error("Node with `source.id=\"{source_id}\"` not found in analyses for dataview \"{dataview}\"")]
    MissingDataviewNode { dataview: String, source_id: String },

    /// Filter parameters that cannot be applied.
    #[error("Invalid filter for {target}: {message}")]
    InvalidFilter { target: String, message: String },

    /// An analysis definition could not be turned into a graph.
    #[error("Analysis error in node {node}: {message}")]
    Analysis {
        analysis_id: Option<String>,
        node: NodeRef,
        message: String,
    },

    /// The SQL capability failed while building an analysis.
    #[error("Dependency error: {0}")]
    Dependency(String),
}

/// Identifies the node an analysis error refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRef {
    pub id: Option<String>,
    pub node_type: String,
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "\"{id}\" ({})", self.node_type),
            None => write!(f, "<anonymous> ({})", self.node_type),
        }
    }
}

impl PipelineError {
    pub fn analysis(id: Option<&str>, node_type: &str, message: impl Into<String>) -> Self {
        Self::Analysis {
            analysis_id: None,
            node: NodeRef {
                id: id.map(str::to_string),
                node_type: node_type.to_string(),
            },
            message: message.into(),
        }
    }

    /// Tag an analysis error with the id of the top-level definition it
    /// came from.
    pub fn in_analysis(self, analysis_id: Option<&str>) -> Self {
        match self {
            Self::Analysis { node, message, .. } => Self::Analysis {
                analysis_id: analysis_id.map(str::to_string),
                node,
                message,
            },
            other => other,
        }
    }

    /// Whether the error is caused by the configuration itself (never
    /// retried) rather than by a collaborator.
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::Dependency(_))
    }
}

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Dependency(msg) => Self::Dependency(msg),
            other => Self::Dependency(other.to_string()),
        }
    }
}

/// All errors a failing stage reported.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineErrors(pub Vec<PipelineError>);

impl PipelineErrors {
    pub fn iter(&self) -> impl Iterator<Item = &PipelineError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether every error is a configuration problem.
    pub fn all_validation(&self) -> bool {
        self.0.iter().all(PipelineError::is_validation)
    }
}

impl fmt::Display for PipelineErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&messages.join("; "))
    }
}

impl std::error::Error for PipelineErrors {}

impl From<Vec<PipelineError>> for PipelineErrors {
    fn from(errors: Vec<PipelineError>) -> Self {
        Self(errors)
    }
}

impl From<PipelineError> for PipelineErrors {
    fn from(error: PipelineError) -> Self {
        Self(vec![error])
    }
}
