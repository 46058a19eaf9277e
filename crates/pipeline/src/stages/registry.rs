//! Build the per-request datasource registry and collect affected tables.

use indexmap::IndexSet;
use tilegraph_core::mapconfig::MapConfig;

use crate::datasource::{Datasource, DatasourceRegistry};
use crate::stages::SourceIndex;

/// Register a datasource for every layer and dataview, and return the
/// qualified names of all tables known to be affected, in discovery order.
pub fn build(config: &MapConfig, index: &SourceIndex<'_>) -> (DatasourceRegistry, Vec<String>) {
    let mut registry = DatasourceRegistry::new();
    let mut tables: IndexSet<String> = IndexSet::new();

    for (layer_index, layer) in config.layers.iter().enumerate() {
        let datasource = match layer.source_id().and_then(|id| index.resolve(id)) {
            Some((graph, node)) => Datasource::from_node(graph.clone(), node),
            None => match layer.options.sql.as_deref() {
                Some(sql) => Datasource::from_query(sql),
                None => continue,
            },
        };
        tables.extend(layer.options.affected_tables.iter().cloned());
        registry.assign_layer(layer_index, datasource);
    }

    for (name, dataview) in &config.dataviews {
        if let Some((graph, node)) = dataview.source_id().and_then(|id| index.resolve(id)) {
            let datasource = Datasource::from_node(graph.clone(), node);
            tables.extend(datasource.affected_tables().identifiers());
            registry.assign_dataview(name, datasource);
        }
    }

    (registry, tables.into_iter().collect())
}
