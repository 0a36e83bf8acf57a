//! Rule-set registry repository.
//!
//! Rows are seeded by the first migration. Afterwards only `enabled` and
//! `updated_at` change.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use subforge_core::{RuleSet, RuleSetType};

use crate::error::Result;
use crate::repository::{conversion_error, datetime_column};

/// Repository for rule-set operations.
pub struct RuleSetsRepo;

impl RuleSetsRepo {
    /// Get a rule set by tag.
    pub fn get(conn: &Connection, tag: &str) -> Result<Option<RuleSet>> {
        let mut stmt = conn.prepare(
            "SELECT tag, url, path, kind, outbound, enabled, updated_at
             FROM rule_sets WHERE tag = ?1",
        )?;
        let set = stmt.query_row([tag], map_row).optional()?;
        Ok(set)
    }

    /// Get all rule sets in seed order.
    pub fn get_all(conn: &Connection) -> Result<Vec<RuleSet>> {
        let mut stmt = conn.prepare(
            "SELECT tag, url, path, kind, outbound, enabled, updated_at
             FROM rule_sets ORDER BY position ASC",
        )?;
        let sets = stmt
            .query_map([], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sets)
    }

    /// Enable or disable a rule set.
    pub fn set_enabled(conn: &Connection, tag: &str, enabled: bool) -> Result<bool> {
        let updated = conn.execute(
            "UPDATE rule_sets SET enabled = ?1 WHERE tag = ?2",
            params![enabled as i32, tag],
        )?;
        Ok(updated > 0)
    }

    /// Record a successful download.
    pub fn set_updated_at(conn: &Connection, tag: &str, at: DateTime<Utc>) -> Result<bool> {
        let updated = conn.execute(
            "UPDATE rule_sets SET updated_at = ?1 WHERE tag = ?2",
            params![at.to_rfc3339(), tag],
        )?;
        Ok(updated > 0)
    }
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<RuleSet> {
    let kind: String = row.get(3)?;
    let kind = RuleSetType::parse(&kind)
        .ok_or_else(|| conversion_error(3, format!("unknown rule-set kind: {:?}", kind)))?;
    Ok(RuleSet {
        tag: row.get(0)?,
        url: row.get(1)?,
        path: row.get(2)?,
        kind,
        outbound: row.get(4)?,
        enabled: row.get::<_, i32>(5)? != 0,
        updated_at: datetime_column(row, 6)?,
    })
}
