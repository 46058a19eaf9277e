use serde_json::Value;
use tilegraph_core::mapconfig::RequestFilters;

/// Who the configuration is resolved for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionContext {
    pub dbname: String,
    /// Database role queries run as.
    pub user: String,
}

impl ResolutionContext {
    pub fn new(dbname: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            dbname: dbname.into(),
            user: user.into(),
        }
    }
}

/// Per-request parameters that influence resolution.
#[derive(Debug, Clone, Default)]
pub struct RequestParams {
    pub filters: RequestFilters,
    /// Buffer-size overrides keyed by output format.
    pub buffersize: Option<Value>,
}

impl RequestParams {
    /// Build from the raw `filters` and `buffersize` query parameters.
    /// Malformed values are ignored.
    pub fn from_raw(filters: Option<&str>, buffersize: Option<&str>) -> Self {
        Self {
            filters: RequestFilters::parse(filters),
            buffersize: buffersize.and_then(|raw| serde_json::from_str(raw).ok()),
        }
    }
}
