//! PostgreSQL table-name parsing and identifier quoting.
//!
//! Table names arrive from several places (analysis params, the table
//! introspection function, invalidation requests) in any of the forms
//! `table`, `schema.table`, `"Quoted Table"`, `"my schema"."t"`.

use std::fmt;

use crate::error::CoreError;

/// A parsed, possibly schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableName {
    pub schema: Option<String>,
    pub table: String,
}

impl TableName {
    pub fn new(schema: Option<&str>, table: &str) -> Self {
        Self {
            schema: schema.map(str::to_string),
            table: table.to_string(),
        }
    }

    /// Parse a raw table reference.
    ///
    /// Quoted parts may contain dots and doubled quotes (`""`). More than two
    /// dot-separated parts, empty parts or unbalanced quotes are rejected.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let parts = split_parts(raw.trim())
            .ok_or_else(|| CoreError::Validation(format!("Invalid table name: {raw}")))?;

        match parts.as_slice() {
            [table] => Ok(Self {
                schema: None,
                table: table.clone(),
            }),
            [schema, table] => Ok(Self {
                schema: Some(schema.clone()),
                table: table.clone(),
            }),
            _ => Err(CoreError::Validation(format!("Invalid table name: {raw}"))),
        }
    }

    /// Schema-qualified identifier with each part quoted only when needed.
    pub fn identifier(&self) -> String {
        match &self.schema {
            Some(schema) => format!(
                "{}.{}",
                quote_identifier_if_needed(schema),
                quote_identifier_if_needed(&self.table)
            ),
            None => quote_identifier_if_needed(&self.table),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identifier())
    }
}

/// Quote a PostgreSQL identifier unless it is a plain lowercase name.
pub fn quote_identifier_if_needed(ident: &str) -> String {
    if is_plain_identifier(ident) {
        ident.to_string()
    } else {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}

fn is_plain_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Split on unquoted dots, unescaping quoted parts.
fn split_parts(raw: &str) -> Option<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars().peekable();
    let mut in_quotes = false;
    let mut part_started = false;

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
            continue;
        }

        match c {
            '"' => {
                if part_started {
                    return None;
                }
                in_quotes = true;
                part_started = true;
            }
            '.' => {
                if current.is_empty() {
                    return None;
                }
                parts.push(std::mem::take(&mut current));
                part_started = false;
            }
            _ => {
                current.push(c);
                part_started = true;
            }
        }
    }

    if in_quotes || current.is_empty() {
        return None;
    }
    parts.push(current);
    Some(parts)
}
