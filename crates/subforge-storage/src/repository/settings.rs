//! Settings repository (key-value JSON).

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::Result;

/// Repository for settings operations.
pub struct SettingsRepo;

impl SettingsRepo {
    /// Get a raw JSON value.
    pub fn get(conn: &Connection, key: &str) -> Result<Option<serde_json::Value>> {
        let mut stmt = conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
        let value = stmt
            .query_row([key], |row| row.get::<_, String>(0))
            .optional()?
            .map(|s| serde_json::from_str(&s))
            .transpose()?;
        Ok(value)
    }

    /// Set a value (insert or update).
    pub fn set<T: Serialize>(conn: &Connection, key: &str, value: &T) -> Result<()> {
        let value_json = serde_json::to_string(value)?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = ?2",
            params![key, value_json],
        )?;
        Ok(())
    }

    /// Get a typed value, falling back to `T::default()` when absent or unreadable.
    pub fn get_or_default<T: DeserializeOwned + Default>(
        conn: &Connection,
        key: &str,
    ) -> Result<T> {
        match Self::get(conn, key)? {
            Some(value) => Ok(serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(key, error = %e, "stored settings unreadable, using defaults");
                T::default()
            })),
            None => Ok(T::default()),
        }
    }
}
