//! Date/time helpers for stored timestamps.
//!
//! Timestamps are stored as fixed-width RFC3339 UTC strings
//! (`YYYY-MM-DDTHH:MM:SSZ`) so that the store can compare them
//! lexicographically.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use chrono_tz::Tz;

use crate::{Result, WardenError};

/// Convert a UTC timestamp to its stored representation.
pub fn to_db(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a stored timestamp.
///
/// Accepts RFC3339 and the SQLite `datetime('now')` format
/// (`YYYY-MM-DD HH:MM:SS`, assumed UTC).
pub fn from_db(datetime_str: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(datetime_str) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }

    Err(WardenError::Database(format!(
        "malformed timestamp in store: {datetime_str}"
    )))
}

/// Parse an optional stored timestamp.
pub fn from_db_opt(datetime_str: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    datetime_str.map(from_db).transpose()
}

/// Format a DateTime<Utc> in the given timezone.
///
/// Falls back to UTC when the timezone name is unknown.
pub fn format_utc_datetime(dt: &DateTime<Utc>, timezone: &str, format: &str) -> String {
    let tz: Tz = match timezone.parse() {
        Ok(tz) => tz,
        Err(_) => return dt.format(format).to_string(),
    };
    dt.with_timezone(&tz).format(format).to_string()
}
