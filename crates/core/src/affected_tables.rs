//! Base tables a resolved configuration depends on, and the cache-channel
//! values derived from them.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::hashing::sha256_base64_prefix;
use crate::tables::TableName;
use crate::types::{Row, Timestamp};

/// Separator between entries of a cache-channel value.
pub const CACHE_CHANNEL_SEPARATOR: &str = ";;";

/// Length of the per-table tag.
pub const TABLE_TAG_LEN: usize = 6;

const ANALYSIS_CACHE_TABLE_PREFIX: &str = "analysis_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffectedTable {
    pub dbname: String,
    pub schema: String,
    pub table: String,
    /// Last modification time recorded in the table metadata, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

impl AffectedTable {
    pub fn new(dbname: &str, schema: &str, table: &str) -> Self {
        Self {
            dbname: dbname.to_string(),
            schema: schema.to_string(),
            table: table.to_string(),
            updated_at: None,
        }
    }

    pub fn with_updated_at(mut self, updated_at: Timestamp) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    /// `schema.table`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    /// `schema.table` quoted for use inside SQL (`public."MyTable"`).
    pub fn identifier(&self) -> String {
        TableName::new(Some(&self.schema), &self.table).identifier()
    }

    /// `database:schema.table`
    pub fn cache_channel_entry(&self) -> String {
        format!("{}:{}.{}", self.dbname, self.schema, self.table)
    }

    /// Short tag: first characters of base64(SHA-256(`database:table.schema`)).
    pub fn tag(&self) -> String {
        let key = format!("{}:{}.{}", self.dbname, self.table, self.schema);
        sha256_base64_prefix(key.as_bytes(), TABLE_TAG_LEN)
    }

    /// Tables materialized by the analysis backend (`analysis_<hash>`).
    pub fn is_analysis_cache(&self) -> bool {
        self.table.starts_with(ANALYSIS_CACHE_TABLE_PREFIX)
    }

    fn identity(&self) -> (&str, &str, &str) {
        (&self.dbname, &self.schema, &self.table)
    }

    /// Whether `name` (bare or `schema.table`) refers to this table.
    pub fn matches(&self, dbname: &str, name: &str) -> bool {
        if self.dbname != dbname {
            return false;
        }
        match name.split_once('.') {
            Some((schema, table)) => self.schema == schema && self.table == table,
            None => self.table == name,
        }
    }
}

/// Ordered, de-duplicated set of affected tables, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffectedTables {
    tables: Vec<AffectedTable>,
}

impl AffectedTables {
    pub fn new(tables: impl IntoIterator<Item = AffectedTable>) -> Self {
        let mut set = Self::default();
        for table in tables {
            set.push(table);
        }
        set
    }

    /// Build from the rows of [`affected_tables_query`](crate::query::affected_tables_query)
    /// (`dbname`, `schema_name`, `table_name`, `updated_at`).
    pub fn from_rows(rows: &[Row]) -> Result<Self, CoreError> {
        rows.iter().map(table_from_row).collect()
    }

    /// Add a table unless it is already present. A later `updated_at`
    /// replaces an earlier or missing one.
    pub fn push(&mut self, table: AffectedTable) {
        match self
            .tables
            .iter_mut()
            .find(|t| t.identity() == table.identity())
        {
            Some(existing) => {
                if table.updated_at > existing.updated_at {
                    existing.updated_at = table.updated_at;
                }
            }
            None => self.tables.push(table),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &AffectedTable> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// `schema.table` for every table, in discovery order.
    pub fn qualified_names(&self) -> Vec<String> {
        self.tables.iter().map(AffectedTable::qualified_name).collect()
    }

    /// SQL identifiers for every table, in discovery order.
    pub fn identifiers(&self) -> Vec<String> {
        self.tables.iter().map(AffectedTable::identifier).collect()
    }

    /// The cache-channel value: `database:schema.table` entries, sorted and
    /// de-duplicated, joined by [`CACHE_CHANNEL_SEPARATOR`].
    ///
    /// Sorting makes the value independent of discovery order.
    pub fn cache_channel(&self) -> String {
        let mut entries: Vec<String> = self
            .tables
            .iter()
            .map(AffectedTable::cache_channel_entry)
            .collect();
        entries.sort();
        entries.dedup();
        entries.join(CACHE_CHANNEL_SEPARATOR)
    }

    /// Per-table tags in cache-channel order.
    pub fn table_tags(&self) -> Vec<String> {
        let mut tables: Vec<&AffectedTable> = self.tables.iter().collect();
        tables.sort_by(|a, b| a.identity().cmp(&b.identity()));
        tables.into_iter().map(AffectedTable::tag).collect()
    }

    /// Most recent known modification time.
    pub fn last_updated_at(&self) -> Option<Timestamp> {
        self.tables.iter().filter_map(|t| t.updated_at).max()
    }

    /// Whether every table reports a modification time, meaning a change to
    /// any of them will be noticed and purged. Analysis cache tables are
    /// ignored; a query touching no tables trivially qualifies.
    pub fn can_all_be_invalidated(&self) -> bool {
        self.tables
            .iter()
            .filter(|t| !t.is_analysis_cache())
            .all(|t| t.updated_at.is_some())
    }

    /// Whether any table in the set matches `name` in `dbname`.
    pub fn contains(&self, dbname: &str, name: &str) -> bool {
        self.tables.iter().any(|t| t.matches(dbname, name))
    }
}

fn table_from_row(row: &Row) -> Result<AffectedTable, CoreError> {
    let text = |column: &str| {
        row.get(column)
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::Dependency(format!("Affected tables row is missing `{column}`")))
    };
    let updated_at = match row.get("updated_at").and_then(|v| v.as_str()) {
        Some(raw) => Some(
            chrono::DateTime::parse_from_rfc3339(raw)
                .map_err(|e| CoreError::Dependency(format!("Invalid updated_at `{raw}`: {e}")))?
                .with_timezone(&chrono::Utc),
        ),
        None => None,
    };
    Ok(AffectedTable {
        dbname: text("dbname")?.to_string(),
        schema: text("schema_name")?.to_string(),
        table: text("table_name")?.to_string(),
        updated_at,
    })
}

impl FromIterator<AffectedTable> for AffectedTables {
    fn from_iter<I: IntoIterator<Item = AffectedTable>>(iter: I) -> Self {
        Self::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn table(schema: &str, name: &str) -> AffectedTable {
        AffectedTable::new("cartodb_user_1_db", schema, name)
    }

    #[test]
    fn cache_channel_is_independent_of_discovery_order() {
        let a = AffectedTables::new([table("public", "places"), table("public", "admin0")]);
        let b = AffectedTables::new([table("public", "admin0"), table("public", "places")]);
        assert_eq!(a.cache_channel(), b.cache_channel());
        assert_eq!(
            a.cache_channel(),
            "cartodb_user_1_db:public.admin0;;cartodb_user_1_db:public.places"
        );
    }

    #[test]
    fn duplicate_tables_collapse() {
        let set = AffectedTables::new([table("public", "a"), table("public", "a")]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.cache_channel(), "cartodb_user_1_db:public.a");
    }

    #[test]
    fn discovery_order_is_kept_for_names() {
        let set = AffectedTables::new([table("public", "b"), table("other", "a")]);
        assert_eq!(set.qualified_names(), vec!["public.b", "other.a"]);
    }

    #[test]
    fn identifiers_quote_mixed_case_but_channels_do_not() {
        let set = AffectedTables::new([table("public", "MyTable"), table("My Schema", "places")]);
        assert_eq!(set.identifiers(), vec![r#"public."MyTable""#, r#""My Schema".places"#]);
        assert_eq!(set.qualified_names(), vec!["public.MyTable", "My Schema.places"]);
        assert_eq!(
            set.cache_channel(),
            "cartodb_user_1_db:My Schema.places;;cartodb_user_1_db:public.MyTable"
        );
        assert_eq!(table("public", "places").identifier(), "public.places");
    }

    #[test]
    fn tag_is_six_base64_characters() {
        let tag = table("public", "places").tag();
        assert_eq!(tag.len(), TABLE_TAG_LEN);
        assert!(tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/'));
        assert_ne!(tag, table("public", "admin0").tag());
    }

    #[test]
    fn tag_uses_table_before_schema() {
        let t = table("public", "places");
        let expected = crate::hashing::sha256_base64_prefix(b"cartodb_user_1_db:places.public", 6);
        assert_eq!(t.tag(), expected);
    }

    #[test]
    fn last_updated_and_invalidation_coverage() {
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let partial = AffectedTables::new([
            table("public", "a").with_updated_at(t1),
            table("public", "b"),
        ]);
        assert_eq!(partial.last_updated_at(), Some(t1));
        assert!(!partial.can_all_be_invalidated());

        let full = AffectedTables::new([
            table("public", "a").with_updated_at(t1),
            table("public", "b").with_updated_at(t2),
        ]);
        assert_eq!(full.last_updated_at(), Some(t2));
        assert!(full.can_all_be_invalidated());
        assert!(AffectedTables::default().can_all_be_invalidated());
    }

    #[test]
    fn analysis_cache_tables_do_not_block_invalidation() {
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let set = AffectedTables::new([
            table("public", "a").with_updated_at(t1),
            table("public", "analysis_b194a8f896_0dd2bd5d0fa3f9ad"),
        ]);
        assert!(set.can_all_be_invalidated());
    }

    #[test]
    fn parses_introspection_rows() {
        let rows: Vec<Row> = serde_json::from_value(serde_json::json!([
            { "dbname": "db", "schema_name": "public", "table_name": "a", "updated_at": "2024-01-01T10:00:00.5+00:00" },
            { "dbname": "db", "schema_name": "public", "table_name": "b", "updated_at": null }
        ]))
        .unwrap();
        let set = AffectedTables::from_rows(&rows).unwrap();
        assert_eq!(set.qualified_names(), vec!["public.a", "public.b"]);
        assert!(set.last_updated_at().is_some());
        assert!(!set.can_all_be_invalidated());
    }

    #[test]
    fn rows_missing_columns_are_dependency_errors() {
        let rows: Vec<Row> = serde_json::from_value(serde_json::json!([{ "dbname": "db" }])).unwrap();
        assert!(matches!(AffectedTables::from_rows(&rows), Err(CoreError::Dependency(_))));
    }

    #[test]
    fn matches_bare_and_qualified_names() {
        let set = AffectedTables::new([table("public", "places")]);
        assert!(set.contains("cartodb_user_1_db", "places"));
        assert!(set.contains("cartodb_user_1_db", "public.places"));
        assert!(!set.contains("cartodb_user_1_db", "other.places"));
        assert!(!set.contains("another_db", "places"));
    }
}
