/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// A single result row from the SQL capability, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;
