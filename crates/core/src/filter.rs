//! Node filters (category and range) and their SQL rendering.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::query::quote_literal;
use crate::tables::quote_identifier_if_needed;

/// The kind of filter a dataview contributes to its source node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Category,
    Range,
}

impl FilterKind {
    /// `aggregation` dataviews filter by category, `histogram` by range.
    pub fn for_dataview_type(dataview_type: &str) -> Option<Self> {
        match dataview_type {
            "aggregation" => Some(Self::Category),
            "histogram" => Some(Self::Range),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// A filter declared on an analysis node, keyed by name in the node's
/// filter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Filter {
    Category {
        column: String,
        #[serde(default)]
        params: CategoryParams,
    },
    Range {
        column: String,
        #[serde(default)]
        params: RangeParams,
    },
}

impl Filter {
    /// Build the filter a dataview contributes from its request parameters.
    pub fn from_dataview(kind: FilterKind, column: &str, params: &Value) -> Result<Self, CoreError> {
        let filter = match kind {
            FilterKind::Category => Filter::Category {
                column: column.to_string(),
                params: serde_json::from_value(params.clone()).map_err(|e| {
                    CoreError::Validation(format!("Invalid category filter params: {e}"))
                })?,
            },
            FilterKind::Range => Filter::Range {
                column: column.to_string(),
                params: serde_json::from_value(params.clone()).map_err(|e| {
                    CoreError::Validation(format!("Invalid range filter params: {e}"))
                })?,
            },
        };
        filter.validate()?;
        Ok(filter)
    }

    pub fn kind(&self) -> FilterKind {
        match self {
            Filter::Category { .. } => FilterKind::Category,
            Filter::Range { .. } => FilterKind::Range,
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Filter::Category { column, .. } | Filter::Range { column, .. } => column,
        }
    }

    /// Check the parameters are usable.
    ///
    /// A range filter needs at least one finite bound; category values must
    /// be scalars.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            Filter::Range { params, .. } => {
                let finite = |v: Option<f64>| v.is_some_and(f64::is_finite);
                if !finite(params.min) && !finite(params.max) {
                    return Err(CoreError::Validation(
                        "Range filter expects at least one numeric value in min or max".into(),
                    ));
                }
            }
            Filter::Category { params, .. } => {
                let values = params.accept.iter().chain(params.reject.iter()).flatten();
                for value in values {
                    if value.is_object() || value.is_array() {
                        return Err(CoreError::Validation(format!(
                            "Category filter values must be scalars, found {value}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// The boolean SQL predicate for this filter, or `None` when it does
    /// not constrain anything.
    pub fn predicate(&self) -> Option<String> {
        let column = quote_identifier_if_needed(self.column());
        match self {
            Filter::Category { params, .. } => {
                let mut clauses = Vec::new();
                if let Some(accept) = params.accept.as_ref().filter(|a| !a.is_empty()) {
                    clauses.push(format!("{column} IN ({})", literal_list(accept)));
                }
                if let Some(reject) = params.reject.as_ref().filter(|r| !r.is_empty()) {
                    clauses.push(format!("{column} NOT IN ({})", literal_list(reject)));
                }
                (!clauses.is_empty()).then(|| clauses.join(" AND "))
            }
            Filter::Range { params, .. } => {
                let min = params.min.filter(|v| v.is_finite());
                let max = params.max.filter(|v| v.is_finite());
                match (min, max) {
                    (Some(min), Some(max)) => Some(format!("{column} BETWEEN {min} AND {max}")),
                    (Some(min), None) => Some(format!("{column} >= {min}")),
                    (None, Some(max)) => Some(format!("{column} <= {max}")),
                    (None, None) => None,
                }
            }
        }
    }

    /// Wrap `sql` so only rows matching this filter remain.
    pub fn apply(&self, sql: &str) -> String {
        let alias = match self {
            Filter::Category { .. } => "_analysis_category_filter",
            Filter::Range { .. } => "_analysis_range_filter",
        };
        match self.predicate() {
            Some(predicate) => format!("SELECT * FROM ({sql}) {alias} WHERE {predicate}"),
            None => sql.to_string(),
        }
    }
}

fn literal_list(values: &[Value]) -> String {
    values
        .iter()
        .map(|value| match value {
            Value::String(s) => quote_literal(s),
            Value::Null => "NULL".to_string(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    // -- FilterKind --

    #[test]
    fn dataview_types_map_to_filter_kinds() {
        assert_eq!(FilterKind::for_dataview_type("aggregation"), Some(FilterKind::Category));
        assert_eq!(FilterKind::for_dataview_type("histogram"), Some(FilterKind::Range));
        assert_eq!(FilterKind::for_dataview_type("formula"), None);
    }

    // -- Filter::from_dataview --

    #[test]
    fn builds_category_filter_from_params() {
        let f = Filter::from_dataview(FilterKind::Category, "adm0name", &json!({"accept": ["Spain"]}))
            .unwrap();
        assert_eq!(f.column(), "adm0name");
        assert_eq!(f.apply("SELECT * FROM t"), "SELECT * FROM (SELECT * FROM t) _analysis_category_filter WHERE adm0name IN ('Spain')");
    }

    #[test]
    fn range_filter_requires_a_bound() {
        let err = Filter::from_dataview(FilterKind::Range, "pop", &json!({})).unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
    }

    #[test]
    fn malformed_params_are_validation_errors() {
        let err = Filter::from_dataview(FilterKind::Range, "pop", &json!({"min": "ten"})).unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
    }

    // -- Filter::predicate --

    #[test]
    fn range_predicates() {
        let between = Filter::Range {
            column: "pop".into(),
            params: RangeParams { min: Some(10.0), max: Some(20.5) },
        };
        assert_eq!(between.predicate().unwrap(), "pop BETWEEN 10 AND 20.5");

        let min_only = Filter::Range {
            column: "pop".into(),
            params: RangeParams { min: Some(1.0), max: None },
        };
        assert_eq!(min_only.predicate().unwrap(), "pop >= 1");
    }

    #[test]
    fn category_accept_and_reject_combine() {
        let f = Filter::Category {
            column: "Name".into(),
            params: CategoryParams {
                accept: Some(vec![json!("a'b"), json!(3)]),
                reject: Some(vec![json!("c")]),
            },
        };
        assert_eq!(
            f.predicate().unwrap(),
            "\"Name\" IN ('a''b', 3) AND \"Name\" NOT IN ('c')"
        );
    }

    #[test]
    fn empty_category_leaves_query_unchanged() {
        let f = Filter::Category {
            column: "c".into(),
            params: CategoryParams::default(),
        };
        assert_eq!(f.apply("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn deserializes_tagged_filters() {
        let f: Filter = serde_json::from_value(json!({
            "type": "range", "column": "pop", "params": {"max": 5}
        }))
        .unwrap();
        assert_eq!(f.kind(), FilterKind::Range);
        assert_eq!(f.predicate().unwrap(), "pop <= 5");
    }
}
