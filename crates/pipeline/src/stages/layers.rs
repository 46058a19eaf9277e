//! Rewrite layer queries from resolved analysis nodes.

use indexmap::IndexSet;
use tilegraph_core::mapconfig::{Layer, MapConfig};
use tilegraph_core::query::apply_sql_wrap;

use crate::error::PipelineError;
use crate::graph::FilterSelection;
use crate::stages::{rendering_query, SourceIndex};

/// Fill in `sql`, `sql_raw`, `sql_no_filters`, `columns` and
/// `affected_tables` for every layer.
///
/// Layers whose `source.id` matches no node are reported, one error per
/// layer, after all layers have been visited. Layers with plain SQL only
/// get their `sql_wrap` applied.
pub fn rewrite(mut config: MapConfig, index: &SourceIndex<'_>) -> Result<MapConfig, Vec<PipelineError>> {
    let mut errors = Vec::new();
    let mut layers = std::mem::take(&mut config.layers);

    for (layer_index, layer) in layers.iter_mut().enumerate() {
        let Some(source_id) = layer.source_id().map(str::to_string) else {
            wrap_plain_sql(layer);
            continue;
        };
        let Some((graph, node_index)) = index.resolve(&source_id) else {
            errors.push(PipelineError::MissingLayerNode {
                layer_index,
                source_id,
            });
            continue;
        };

        let node = graph.node(node_index);
        let sql = rendering_query(node, &FilterSelection::All);
        let no_filters = rendering_query(node, &FilterSelection::Nothing);

        let options = &mut layer.options;
        match options.sql_wrap.as_deref() {
            Some(wrap) => {
                options.sql = Some(apply_sql_wrap(wrap, &sql));
                options.sql_no_filters = Some(apply_sql_wrap(wrap, &no_filters));
                options.sql_raw = Some(sql);
            }
            None => {
                options.sql = Some(sql);
                options.sql_no_filters = Some(no_filters);
            }
        }
        options.columns = dataview_columns(&config, &source_id);
        options.affected_tables = graph.affected_tables(node_index).identifiers();
    }

    config.layers = layers;
    if errors.is_empty() {
        Ok(config)
    } else {
        Err(errors)
    }
}

fn wrap_plain_sql(layer: &mut Layer) {
    let options = &mut layer.options;
    // Already wrapped on a previous pass.
    if options.sql_raw.is_some() {
        return;
    }
    let wrapped = match (&options.sql_wrap, &options.sql) {
        (Some(wrap), Some(sql)) => apply_sql_wrap(wrap, sql),
        _ => return,
    };
    options.sql_raw = options.sql.replace(wrapped);
}

/// Columns used by the dataviews reading the same node as a layer.
fn dataview_columns(config: &MapConfig, source_id: &str) -> Vec<String> {
    let columns: IndexSet<&str> = config
        .dataviews_for_source(source_id)
        .flat_map(|(_, dataview)| dataview.columns())
        .collect();
    columns.into_iter().map(str::to_string).collect()
}
