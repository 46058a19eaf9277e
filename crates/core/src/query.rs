//! SQL text composition helpers.
//!
//! Nothing here executes SQL; the functions only build the statements that
//! are handed to a [`SqlRunner`](crate::capability::SqlRunner).

use std::sync::LazyLock;

use regex::Regex;

/// Rendering tokens that may appear in layer SQL, with the neutral values
/// used when the query is run outside of a tile request.
const DUMMY_TOKENS: &[(&str, &str)] = &[
    ("!bbox!", "ST_MakeEnvelope(0,0,0,0)"),
    ("!scale_denominator!", "0"),
    ("!pixel_width!", "1"),
    ("!pixel_height!", "1"),
];

/// Base dollar-quote tag used when embedding arbitrary SQL inside a
/// function call.
const DOLLAR_QUOTE_TAG: &str = "tilegraph";

static SQL_WRAP_PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<%=\s*sql\s*%>").expect("valid regex"));

/// Replace rendering tokens with neutral values so the query can be planned.
pub fn substitute_dummy_tokens(sql: &str) -> String {
    DUMMY_TOKENS
        .iter()
        .fold(sql.to_string(), |acc, (token, value)| acc.replace(token, value))
}

/// Quote a string as a SQL literal (`'it''s'`).
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Embed arbitrary SQL text as a dollar-quoted literal. The tag gets a
/// numeric suffix until it no longer occurs in `sql`.
pub fn dollar_quote(sql: &str) -> String {
    let mut tag = format!("${DOLLAR_QUOTE_TAG}$");
    let mut suffix = 0u32;
    while sql.contains(&tag) {
        suffix += 1;
        tag = format!("${DOLLAR_QUOTE_TAG}{suffix}$");
    }
    format!("{tag}{sql}{tag}")
}

/// Apply a layer's `sql_wrap` template to a query.
pub fn apply_sql_wrap(wrap: &str, sql: &str) -> String {
    SQL_WRAP_PLACEHOLDER_RE
        .replace_all(wrap, regex::NoExpand(sql))
        .into_owned()
}

/// Probe statement that touches a table without reading rows.
pub fn zero_rows_probe(table: &str) -> String {
    format!("SELECT * FROM {table} LIMIT 0")
}

/// Wrap a query so it returns at most `limit` rows.
pub fn limited_query(sql: &str, limit: u64) -> String {
    format!("SELECT * FROM ({sql}) _tilegraph_limited LIMIT {limit}")
}

/// Introspection query that lists the base tables a statement reads, with
/// the metadata needed for cache invalidation.
///
/// Returns one row per table in discovery order with the columns `dbname`,
/// `schema_name`, `table_name` and `updated_at`.
pub fn affected_tables_query(sql: &str) -> String {
    let quoted = dollar_quote(&substitute_dummy_tokens(sql));
    format!(
        "SELECT current_database() AS dbname, n.nspname AS schema_name, c.relname AS table_name, \
         md.updated_at AS updated_at \
         FROM unnest(CDB_QueryTablesText({quoted})) WITH ORDINALITY AS qt(table_name, ord) \
         JOIN pg_catalog.pg_class c ON c.oid = qt.table_name::regclass \
         JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
         LEFT JOIN cartodb.CDB_TableMetadata md ON md.tabname = c.oid \
         ORDER BY qt.ord"
    )
}

/// Query returning the most recent `updated_at` (epoch milliseconds) for a
/// set of tables, in column `max`.
pub fn last_updated_query(qualified_tables: &[String]) -> String {
    let regclasses = qualified_tables
        .iter()
        .map(|t| format!("{}::regclass", quote_literal(t)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT EXTRACT(EPOCH FROM max(updated_at)) * 1000 AS max \
         FROM cartodb.CDB_TableMetadata m WHERE m.tabname = ANY (ARRAY[{regclasses}])"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_every_rendering_token() {
        let sql = "SELECT * FROM t WHERE the_geom && !bbox! AND !scale_denominator! > 0 \
                   AND !pixel_width! = !pixel_height!";
        let out = substitute_dummy_tokens(sql);
        assert!(out.contains("ST_MakeEnvelope(0,0,0,0)"));
        assert!(out.contains("0 > 0"));
        assert!(out.contains("1 = 1"));
        assert!(!out.contains('!'));
    }

    #[test]
    fn quote_literal_escapes_quotes() {
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn dollar_quote_avoids_tags_present_in_the_sql() {
        assert_eq!(dollar_quote("SELECT 1"), "$tilegraph$SELECT 1$tilegraph$");

        let hostile = "SELECT $tilegraph$); DROP TABLE t; --$tilegraph$";
        assert_eq!(
            dollar_quote(hostile),
            format!("$tilegraph1${hostile}$tilegraph1$")
        );

        let both = "$tilegraph$ $tilegraph1$";
        assert!(dollar_quote(both).starts_with("$tilegraph2$"));
    }

    #[test]
    fn sql_wrap_replaces_every_placeholder() {
        let wrap = "SELECT * FROM (<%= sql %>) a UNION ALL SELECT * FROM (<%=sql%>) b";
        assert_eq!(
            apply_sql_wrap(wrap, "SELECT 1"),
            "SELECT * FROM (SELECT 1) a UNION ALL SELECT * FROM (SELECT 1) b"
        );
    }

    #[test]
    fn sql_wrap_does_not_expand_dollar_signs() {
        assert_eq!(apply_sql_wrap("<%= sql %>", "SELECT '$1'"), "SELECT '$1'");
    }

    #[test]
    fn affected_tables_query_embeds_substituted_sql() {
        let out = affected_tables_query("SELECT * FROM places WHERE the_geom && !bbox!");
        assert!(out.contains("CDB_QueryTablesText($tilegraph$SELECT * FROM places WHERE the_geom && ST_MakeEnvelope(0,0,0,0)$tilegraph$)"));
        assert!(out.ends_with("ORDER BY qt.ord"));
    }

    #[test]
    fn last_updated_query_lists_regclasses() {
        let out = last_updated_query(&["public.a".into(), "public.b".into()]);
        assert!(out.contains("ARRAY['public.a'::regclass, 'public.b'::regclass]"));
    }

    #[test]
    fn limited_query_wraps() {
        assert_eq!(
            limited_query("SELECT 1", 0),
            "SELECT * FROM (SELECT 1) _tilegraph_limited LIMIT 0"
        );
    }
}
