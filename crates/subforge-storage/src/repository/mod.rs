//! Database repositories for each table.

pub mod groups;
pub mod nodes;
pub mod rule_sets;
pub mod settings;
pub mod subscriptions;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use serde::de::DeserializeOwned;

pub use groups::GroupsRepo;
pub use nodes::NodesRepo;
pub use rule_sets::RuleSetsRepo;
pub use settings::SettingsRepo;
pub use subscriptions::SubscriptionsRepo;

/// Parses an RFC 3339 timestamp, or SQLite's `datetime('now')` format.
pub(crate) fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|dt| dt.and_utc())
        })
        .ok()
}

pub(crate) fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

/// Reads a JSON-encoded text column.
pub(crate) fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(idx, e))
}

/// Reads a nullable timestamp column.
pub(crate) fn datetime_column(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(text) => parse_datetime(&text)
            .map(Some)
            .ok_or_else(|| conversion_error(idx, format!("invalid timestamp: {:?}", text))),
        None => Ok(None),
    }
}
