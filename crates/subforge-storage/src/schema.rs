//! Database schema and migrations.

use rusqlite::{params, Connection, OptionalExtension};
use subforge_core::{built_in_rule_sets, GroupMode, CATCH_ALL_GROUP};
use tracing::info;

use crate::error::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version < SCHEMA_VERSION {
        info!(
            "Running migrations from version {} to {}",
            current_version, SCHEMA_VERSION
        );

        if current_version < 1 {
            migrate_v1(conn)?;
        }

        set_schema_version(conn, SCHEMA_VERSION)?;
        info!("Migrations complete");
    }

    Ok(())
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;

    Ok(version.unwrap_or(0))
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Migration to version 1: Initial schema and seed data.
fn migrate_v1(conn: &Connection) -> Result<()> {
    info!("Applying migration v1: Initial schema");

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subscriptions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            url TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL DEFAULT 'unknown',
            content_hash TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT
        )",
        [],
    )?;

    // Nodes are replaced wholesale per subscription; `position` keeps body order
    conn.execute(
        "CREATE TABLE IF NOT EXISTS nodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subscription_id INTEGER NOT NULL REFERENCES subscriptions (id) ON DELETE CASCADE,
            node_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            data TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_nodes_subscription ON nodes (subscription_id, position)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS node_groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            mode TEXT NOT NULL DEFAULT 'select',
            include_patterns TEXT NOT NULL DEFAULT '[]',
            exclude_patterns TEXT NOT NULL DEFAULT '[]',
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS rule_sets (
            tag TEXT PRIMARY KEY,
            position INTEGER NOT NULL,
            url TEXT NOT NULL,
            path TEXT NOT NULL,
            kind TEXT NOT NULL,
            outbound TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT
        )",
        [],
    )?;

    // Settings table - key-value JSON
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO node_groups (name, mode) VALUES (?1, ?2)",
        params![CATCH_ALL_GROUP, GroupMode::Select.as_str()],
    )?;

    for (position, set) in built_in_rule_sets().iter().enumerate() {
        conn.execute(
            "INSERT OR IGNORE INTO rule_sets (tag, position, url, path, kind, outbound, enabled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                set.tag,
                position as i64,
                set.url,
                set.path,
                set.kind.as_str(),
                set.outbound,
                set.enabled as i32
            ],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in ["subscriptions", "nodes", "node_groups", "rule_sets", "settings"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {}", table);
        }
    }

    #[test]
    fn test_seed_data() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let name: String = conn
            .query_row("SELECT name FROM node_groups WHERE id = 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(name, CATCH_ALL_GROUP);

        let sets: i64 = conn
            .query_row("SELECT COUNT(*) FROM rule_sets", [], |row| row.get(0))
            .unwrap();
        assert_eq!(sets as usize, built_in_rule_sets().len());
    }
}
