//! Merge request filters into the analysis definitions.
//!
//! Dataview filters are grouped by the dataview's source node; filters
//! given directly under `analyses` target a node by id. Every node ends up
//! with the union of all filters aimed at it.

use indexmap::IndexMap;
use tilegraph_core::filter::{Filter, FilterKind};
use tilegraph_core::mapconfig::{MapConfig, RequestFilters};

use crate::error::PipelineError;

type FiltersByNode = IndexMap<String, IndexMap<String, Filter>>;

pub fn inject(mut config: MapConfig, filters: &RequestFilters) -> Result<MapConfig, Vec<PipelineError>> {
    if config.analyses.is_empty() || filters.is_empty() {
        return Ok(config);
    }

    let by_node = group_by_node(&config, filters)?;
    tracing::debug!(nodes = by_node.len(), "Injecting filters into analysis nodes");

    config.analyses = config
        .analyses
        .iter()
        .map(|definition| {
            by_node
                .iter()
                .filter(|(node_id, _)| definition.contains_node(node_id))
                .fold(definition.clone(), |def, (node_id, node_filters)| {
                    def.with_filters(node_id, node_filters)
                })
        })
        .collect();

    Ok(config)
}

fn group_by_node(config: &MapConfig, filters: &RequestFilters) -> Result<FiltersByNode, Vec<PipelineError>> {
    let mut by_node = FiltersByNode::new();
    let mut errors = Vec::new();

    for (name, params) in &filters.dataviews {
        if params.is_null() {
            continue;
        }
        let Some(dataview) = config.dataviews.get(name) else {
            tracing::debug!(dataview = %name, "Ignoring filter for unknown dataview");
            continue;
        };
        let (Some(source_id), Some(kind)) = (
            dataview.source_id(),
            dataview.kind.as_deref().and_then(FilterKind::for_dataview_type),
        ) else {
            continue;
        };
        let Some(column) = dataview.options.column.as_deref() else {
            errors.push(PipelineError::InvalidFilter {
                target: format!("dataview \"{name}\""),
                message: "missing `options.column`".into(),
            });
            continue;
        };

        match Filter::from_dataview(kind, column, params) {
            Ok(filter) => {
                by_node
                    .entry(source_id.to_string())
                    .or_default()
                    .insert(name.clone(), filter);
            }
            Err(e) => errors.push(PipelineError::InvalidFilter {
                target: format!("dataview \"{name}\""),
                message: e.to_string(),
            }),
        }
    }

    for (node_id, node_filters) in &filters.analyses {
        for (name, filter) in node_filters {
            if let Err(e) = filter.validate() {
                errors.push(PipelineError::InvalidFilter {
                    target: format!("node \"{node_id}\" filter \"{name}\""),
                    message: e.to_string(),
                });
                continue;
            }
            by_node
                .entry(node_id.clone())
                .or_default()
                .insert(name.clone(), filter.clone());
        }
    }

    if errors.is_empty() {
        Ok(by_node)
    } else {
        Err(errors)
    }
}
