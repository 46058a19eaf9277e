//! HTTP cache header values derived from affected tables.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::affected_tables::AffectedTables;
use crate::error::CoreError;
use crate::types::Timestamp;

pub const X_CACHE_HIT: &str = "X-Cache-Hit";
pub const X_CACHE_CHANNEL: &str = "X-Cache-Channel";
pub const SURROGATE_KEY: &str = "Surrogate-Key";

pub const ONE_YEAR_SECS: u64 = 60 * 60 * 24 * 365;

/// Fallback TTLs that divide an hour evenly, so every node computes the
/// same expiry step.
pub const VALID_FALLBACK_TTLS: &[u64] = &[60, 180, 300, 600, 900, 1800, 3600];

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Format a timestamp as an HTTP date (`Tue, 15 Nov 1994 08:12:31 GMT`).
pub fn http_date(at: Timestamp) -> String {
    at.format(HTTP_DATE_FORMAT).to_string()
}

/// Parse an HTTP date, as sent in `If-Modified-Since`.
pub fn parse_http_date(raw: &str) -> Option<Timestamp> {
    NaiveDateTime::parse_from_str(raw.trim(), HTTP_DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
        .or_else(|| {
            DateTime::parse_from_rfc2822(raw.trim())
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
}

/// Cache-Control policy for responses that depend on affected tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheControlPolicy {
    /// `max-age` when every table can be invalidated.
    pub ttl_secs: u64,
    /// Step used when some table cannot be invalidated.
    pub fallback_ttl_secs: u64,
}

impl Default for CacheControlPolicy {
    fn default() -> Self {
        Self {
            ttl_secs: ONE_YEAR_SECS,
            fallback_ttl_secs: 300,
        }
    }
}

impl CacheControlPolicy {
    pub fn new(ttl_secs: u64, fallback_ttl_secs: u64) -> Result<Self, CoreError> {
        if !VALID_FALLBACK_TTLS.contains(&fallback_ttl_secs) {
            return Err(CoreError::Validation(format!(
                "Invalid fallback TTL value for Cache-Control header. Got {fallback_ttl_secs}, expected one of {VALID_FALLBACK_TTLS:?}"
            )));
        }
        Ok(Self {
            ttl_secs,
            fallback_ttl_secs,
        })
    }

    /// `public,max-age=N` for the given tables at time `now`.
    pub fn header_value(&self, tables: &AffectedTables, now: Timestamp) -> String {
        let max_age = if tables.can_all_be_invalidated() {
            self.ttl_secs
        } else {
            next_ttl_step(self.fallback_ttl_secs, now)
        };
        format!("public,max-age={max_age}")
    }
}

/// Seconds until the next multiple of `step` (wall clock), so responses
/// served at different moments expire together.
pub fn next_ttl_step(step: u64, now: Timestamp) -> u64 {
    let step = step.max(1);
    let millis = u64::try_from(now.timestamp_millis()).unwrap_or(0);
    let now_secs = millis.div_ceil(1000);
    step - now_secs % step
}

/// `Last-Modified` for a response: the tables' last update or `now`.
pub fn last_modified(tables: &AffectedTables, now: Timestamp) -> Timestamp {
    tables.last_updated_at().unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    use super::*;
    use crate::affected_tables::AffectedTable;

    #[test]
    fn http_date_round_trip() {
        let at = Utc.with_ymd_and_hms(1994, 11, 15, 8, 12, 31).unwrap();
        assert_eq!(http_date(at), "Tue, 15 Nov 1994 08:12:31 GMT");
        assert_eq!(parse_http_date("Tue, 15 Nov 1994 08:12:31 GMT"), Some(at));
        assert_eq!(parse_http_date("yesterday"), None);
    }

    #[test]
    fn rejects_uneven_fallback_ttl() {
        assert_matches!(CacheControlPolicy::new(100, 7), Err(CoreError::Validation(_)));
        assert!(CacheControlPolicy::new(100, 600).is_ok());
    }

    #[test]
    fn next_step_counts_down_to_boundary() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap();
        assert_eq!(next_ttl_step(300, at), 240);
        let on_boundary = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();
        assert_eq!(next_ttl_step(300, on_boundary), 300);
    }

    #[test]
    fn full_ttl_only_when_every_table_is_tracked() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap();
        let policy = CacheControlPolicy::default();

        let tracked = AffectedTables::new([AffectedTable::new("db", "public", "a").with_updated_at(now)]);
        assert_eq!(policy.header_value(&tracked, now), "public,max-age=31536000");

        let untracked = AffectedTables::new([AffectedTable::new("db", "public", "a")]);
        assert_eq!(policy.header_value(&untracked, now), "public,max-age=240");
    }
}
