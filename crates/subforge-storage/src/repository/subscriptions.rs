//! Subscriptions repository.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use subforge_core::{NewSubscription, Subscription, SubscriptionType};

use crate::error::Result;
use crate::repository::{conversion_error, datetime_column};

const COLUMNS: &str = "s.id, s.name, s.url, s.kind, s.content_hash, s.created_at, s.updated_at,
     (SELECT COUNT(*) FROM nodes n WHERE n.subscription_id = s.id)";

/// Repository for subscription operations.
pub struct SubscriptionsRepo;

impl SubscriptionsRepo {
    /// Insert a new subscription.
    pub fn insert(conn: &Connection, new: &NewSubscription) -> Result<i64> {
        conn.execute(
            "INSERT INTO subscriptions (name, url, created_at) VALUES (?1, ?2, ?3)",
            params![new.name, new.url, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get a subscription by ID.
    pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<Subscription>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM subscriptions s WHERE s.id = ?1",
            COLUMNS
        ))?;
        let subscription = stmt.query_row([id], map_row).optional()?;
        Ok(subscription)
    }

    /// Get all subscriptions in creation order.
    pub fn get_all(conn: &Connection) -> Result<Vec<Subscription>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM subscriptions s ORDER BY s.id ASC",
            COLUMNS
        ))?;
        let subscriptions = stmt
            .query_map([], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(subscriptions)
    }

    /// Record a successful refresh.
    pub fn mark_refreshed(
        conn: &Connection,
        id: i64,
        kind: SubscriptionType,
        content_hash: &str,
    ) -> Result<bool> {
        let updated = conn.execute(
            "UPDATE subscriptions SET kind = ?1, content_hash = ?2, updated_at = ?3 WHERE id = ?4",
            params![kind.as_str(), content_hash, Utc::now().to_rfc3339(), id],
        )?;
        Ok(updated > 0)
    }

    /// Bump `updated_at` only.
    pub fn touch(conn: &Connection, id: i64) -> Result<bool> {
        let updated = conn.execute(
            "UPDATE subscriptions SET updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(updated > 0)
    }

    /// Delete a subscription. Its nodes go with it.
    pub fn delete(conn: &Connection, id: i64) -> Result<bool> {
        let deleted = conn.execute("DELETE FROM subscriptions WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    let kind: String = row.get(3)?;
    Ok(Subscription {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        kind: SubscriptionType::parse(&kind),
        content_hash: row.get(4)?,
        created_at: datetime_column(row, 5)?
            .ok_or_else(|| conversion_error(5, "created_at is null"))?,
        updated_at: datetime_column(row, 6)?,
        node_count: row.get::<_, i64>(7)? as usize,
    })
}
