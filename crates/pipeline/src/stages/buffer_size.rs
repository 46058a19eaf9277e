//! Per-format buffer-size overrides from the request.

use serde_json::{Number, Value};
use tilegraph_core::mapconfig::MapConfig;

/// Output formats whose buffer size may be overridden.
pub const FORMATS: &[&str] = &["png", "png32", "mvt", "grid.json", "geojson"];

/// Apply `overrides` (a JSON object keyed by format) to the configuration.
///
/// Only recognized formats with a finite numeric value are taken; anything
/// else is ignored rather than rejected.
pub fn apply(mut config: MapConfig, overrides: Option<&Value>) -> MapConfig {
    let Some(Value::Object(overrides)) = overrides else {
        return config;
    };

    for format in FORMATS {
        let Some(raw) = overrides.get(*format) else {
            continue;
        };
        match finite_number(raw) {
            Some(value) => {
                config.buffersize.insert((*format).to_string(), Value::Number(value));
            }
            None => tracing::debug!(format, value = %raw, "Ignoring invalid buffer size override"),
        }
    }
    config
}

fn finite_number(raw: &Value) -> Option<Number> {
    match raw {
        Value::Number(n) if n.as_f64().is_some_and(f64::is_finite) => Some(n.clone()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .and_then(Number::from_f64),
        _ => None,
    }
}
