//! Row decoding helpers shared by the repositories.

use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use super::errors::DatabaseError;

/// Parse a stored timestamp.
///
/// Accepts RFC3339 (what we write) and SQLite's `datetime('now')` format
/// (what DDL defaults write), both interpreted as UTC.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    Err(DatabaseError::Corrupted(format!(
        "unparseable timestamp: {s:?}"
    )))
}

/// Parse an optional stored timestamp.
pub fn parse_datetime_opt(s: Option<&str>) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    s.map(parse_datetime).transpose()
}

/// Parse a stored UUID.
pub fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Corrupted(format!("bad uuid {s:?}: {e}")))
}

/// Parse an optional stored UUID.
pub fn parse_uuid_opt(s: Option<&str>) -> Result<Option<Uuid>, DatabaseError> {
    s.map(parse_uuid).transpose()
}
