use tilegraph_core::mapconfig::MapConfig;

use crate::error::PipelineError;

/// Every dataview must declare `source.id` and `type`. Reports one error
/// per missing attribute across all dataviews.
pub fn dataviews(config: &MapConfig) -> Result<(), Vec<PipelineError>> {
    let mut errors = Vec::new();

    for (name, dataview) in &config.dataviews {
        if dataview.source_id().map_or(true, str::is_empty) {
            errors.push(PipelineError::InvalidDataview {
                dataview: name.clone(),
                attribute: "source.id",
            });
        }
        if dataview.kind.as_deref().map_or(true, str::is_empty) {
            errors.push(PipelineError::InvalidDataview {
                dataview: name.clone(),
                attribute: "type",
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
