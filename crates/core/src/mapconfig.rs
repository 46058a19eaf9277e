//! Declarative map configuration model.
//!
//! A [`MapConfig`] is what clients post: layers, analysis definitions and
//! dataviews. Resolution fills in the derived fields (`sql`, `sql_raw`,
//! `sql_no_filters`, `columns`, `affected_tables`, dataview `sql`/`node`).
//! Fields this crate does not interpret are preserved through `extra`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::filter::Filter;
use crate::hashing::sha256_hex;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub layers: Vec<Layer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub analyses: Vec<AnalysisDefinition>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub dataviews: IndexMap<String, Dataview>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub buffersize: IndexMap<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MapConfig {
    /// Configuration token: SHA-256 of the serialized configuration.
    ///
    /// Field and map order are preserved on serialization, so the same
    /// configuration always produces the same token.
    pub fn id(&self) -> Result<String, CoreError> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| CoreError::Internal(format!("Failed to serialize map config: {e}")))?;
        Ok(sha256_hex(&bytes))
    }

    /// Dataviews whose `source.id` matches `source_id`, in declaration order.
    pub fn dataviews_for_source<'a>(
        &'a self,
        source_id: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Dataview)> + 'a {
        self.dataviews
            .iter()
            .filter(move |(_, dv)| dv.source_id() == Some(source_id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    #[serde(rename = "type", default = "default_layer_type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub options: LayerOptions,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_layer_type() -> String {
    "mapnik".to_string()
}

impl Layer {
    pub fn source_id(&self) -> Option<&str> {
        self.options.source.as_ref().and_then(|s| s.id.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_wrap: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_no_filters: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_tables: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Reference from a layer or dataview to an analysis node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl SourceRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: Some(id.into()) }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataview {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceRef>,
    #[serde(default)]
    pub options: DataviewOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<DataviewSql>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<DataviewNode>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Dataview {
    pub fn source_id(&self) -> Option<&str> {
        self.source.as_ref().and_then(|s| s.id.as_deref())
    }

    /// Columns this dataview reads (`column`, `aggregationColumn`).
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        [&self.options.column, &self.options.aggregation_column]
            .into_iter()
            .filter_map(|c| c.as_deref())
            .filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataviewOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(
        rename = "aggregationColumn",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub aggregation_column: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The three query variants every resolved dataview carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataviewSql {
    pub own_filter_on: String,
    pub own_filter_off: String,
    pub no_filters: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataviewNode {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub filters: IndexMap<String, Filter>,
}

// ---------------------------------------------------------------------------
// Analysis definitions
// ---------------------------------------------------------------------------

/// Declarative definition of one analysis node and, through its params,
/// all of its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: IndexMap<String, Param>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub filters: IndexMap<String, Filter>,
}

/// A node parameter: either a nested node definition (an input) or a plain
/// JSON value.
///
/// Any object carrying a `type` key is read as a node definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Param {
    Node(Box<AnalysisDefinition>),
    Value(Value),
}

impl AnalysisDefinition {
    /// Input definitions in param order.
    pub fn inputs(&self) -> impl Iterator<Item = (&str, &AnalysisDefinition)> {
        self.params.iter().filter_map(|(name, param)| match param {
            Param::Node(node) => Some((name.as_str(), node.as_ref())),
            Param::Value(_) => None,
        })
    }

    pub fn param_value(&self, name: &str) -> Option<&Value> {
        match self.params.get(name) {
            Some(Param::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// Whether this definition or any of its inputs has the given id.
    pub fn contains_node(&self, node_id: &str) -> bool {
        self.id.as_deref() == Some(node_id)
            || self.inputs().any(|(_, input)| input.contains_node(node_id))
    }

    /// A copy of this definition where the node `node_id` has `filters`
    /// merged into its declared filters. Existing filters with the same
    /// name are replaced; all others are kept.
    pub fn with_filters(&self, node_id: &str, filters: &IndexMap<String, Filter>) -> Self {
        let mut copy = self.clone();
        copy.merge_filters(node_id, filters);
        copy
    }

    fn merge_filters(&mut self, node_id: &str, filters: &IndexMap<String, Filter>) {
        if self.id.as_deref() == Some(node_id) {
            for (name, filter) in filters {
                self.filters.insert(name.clone(), filter.clone());
            }
        }
        for param in self.params.values_mut() {
            if let Param::Node(input) = param {
                input.merge_filters(node_id, filters);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Request filters
// ---------------------------------------------------------------------------

/// The `filters` request parameter.
///
/// `dataviews` maps dataview name to that dataview's filter params;
/// `analyses` maps node id to named filters applied directly to that node.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RequestFilters {
    #[serde(default)]
    pub dataviews: IndexMap<String, Value>,
    #[serde(default)]
    pub analyses: IndexMap<String, IndexMap<String, Filter>>,
}

impl RequestFilters {
    /// Parse the raw parameter. Malformed input is treated as no filters.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw).unwrap_or_default(),
            _ => Self::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dataviews.is_empty() && self.analyses.is_empty()
    }
}
