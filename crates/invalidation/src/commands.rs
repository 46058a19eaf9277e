//! Purge commands understood by the management port.

use tilegraph_core::headers::X_CACHE_CHANNEL;

/// Purge every object whose cache channel mentions `table` in `dbname`,
/// plus objects tagged with the catch-all `table` channel.
pub fn purge_table(dbname: &str, table: &str) -> String {
    format!(
        "purge obj.http.{X_CACHE_CHANNEL} ~ \"^{}:(.*{}.*)|(table)$\"",
        sanitize(dbname),
        sanitize(table)
    )
}

/// Purge objects carrying exactly this cache channel value.
pub fn purge_channel(channel: &str) -> String {
    format!("purge obj.http.{X_CACHE_CHANNEL} == \"{}\"", sanitize(channel))
}

/// Strip characters that would end the quoted argument or the command line.
fn sanitize(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, '"' | '\n' | '\r'))
        .collect()
}
