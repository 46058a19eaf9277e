//! Materialize the three query variants of every dataview.

use tilegraph_core::mapconfig::{DataviewNode, DataviewSql, MapConfig};

use crate::error::PipelineError;
use crate::graph::FilterSelection;
use crate::stages::{rendering_query, SourceIndex};

/// Attach `sql` (own filter on, own filter off, no filters) and `node`
/// to every dataview. A dataview whose source node does not exist fails
/// the whole request.
pub fn materialize(mut config: MapConfig, index: &SourceIndex<'_>) -> Result<MapConfig, Vec<PipelineError>> {
    let mut errors = Vec::new();

    for (name, dataview) in config.dataviews.iter_mut() {
        let source_id = dataview.source_id().unwrap_or_default().to_string();
        let Some((graph, node_index)) = index.resolve(&source_id) else {
            errors.push(PipelineError::MissingDataviewNode {
                dataview: name.clone(),
                source_id,
            });
            continue;
        };

        let node = graph.node(node_index);
        dataview.sql = Some(DataviewSql {
            own_filter_on: rendering_query(node, &FilterSelection::All),
            own_filter_off: rendering_query(node, &FilterSelection::except(name.as_str())),
            no_filters: rendering_query(node, &FilterSelection::Nothing),
        });
        dataview.node = Some(DataviewNode {
            kind: node.kind().to_string(),
            filters: node.filters().clone(),
        });
    }

    if errors.is_empty() {
        Ok(config)
    } else {
        Err(errors)
    }
}
