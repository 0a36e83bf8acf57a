//! High-level database interface.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use subforge_core::store::{self, ConfigStore};
use subforge_core::{
    NewGroup, NewSubscription, Node, NodeGroup, RuleSet, Settings, Subscription, SubscriptionType,
};
use tracing::{debug, info};

use crate::error::{Result, StorageError};
use crate::pool::ConnectionPool;
use crate::repository::{GroupsRepo, NodesRepo, RuleSetsRepo, SettingsRepo, SubscriptionsRepo};

/// Settings key holding the whole [`Settings`] document.
const SETTINGS_KEY: &str = "app";

/// High-level database interface for Subforge.
#[derive(Clone)]
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    /// Create a new database in the default app data directory.
    pub fn new() -> Result<Self> {
        Self::with_path(Self::default_db_path()?)
    }

    /// Create a new database at a specific path.
    pub fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening database at: {:?}", path);
        let pool = ConnectionPool::new(&path)?;

        Ok(Self { pool })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let pool = ConnectionPool::in_memory()?;
        Ok(Self { pool })
    }

    /// Get the default database path.
    pub fn default_db_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "subforge", "subforge")
            .ok_or_else(|| StorageError::Config("Could not determine app data directory".into()))?;

        Ok(proj_dirs.data_dir().join("subforge.db"))
    }

    // === Settings ===

    /// Load settings, or defaults if none are stored yet.
    pub fn get_settings(&self) -> Result<Settings> {
        let conn = self.pool.get()?;
        SettingsRepo::get_or_default(&conn, SETTINGS_KEY)
    }

    /// Store settings.
    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        let conn = self.pool.get()?;
        SettingsRepo::set(&conn, SETTINGS_KEY, settings)
    }

    // === Subscriptions ===

    /// Create a subscription.
    pub fn create_subscription(&self, new: &NewSubscription) -> Result<Subscription> {
        let conn = self.pool.get()?;
        let id = SubscriptionsRepo::insert(&conn, new)?;
        SubscriptionsRepo::get_by_id(&conn, id)?
            .ok_or_else(|| StorageError::NotFound(format!("subscription {}", id)))
    }

    /// Get a subscription by ID.
    pub fn get_subscription(&self, id: i64) -> Result<Option<Subscription>> {
        let conn = self.pool.get()?;
        SubscriptionsRepo::get_by_id(&conn, id)
    }

    /// Get all subscriptions.
    pub fn get_all_subscriptions(&self) -> Result<Vec<Subscription>> {
        let conn = self.pool.get()?;
        SubscriptionsRepo::get_all(&conn)
    }

    /// Delete a subscription and its nodes.
    pub fn delete_subscription(&self, id: i64) -> Result<bool> {
        let conn = self.pool.get()?;
        SubscriptionsRepo::delete(&conn, id)
    }

    /// Replace a subscription's nodes and record the refresh in one transaction.
    pub fn replace_nodes(
        &self,
        subscription_id: i64,
        kind: SubscriptionType,
        content_hash: &str,
        nodes: &[Node],
    ) -> Result<()> {
        let conn = self.pool.get()?;
        let tx = conn.unchecked_transaction()?;
        if !SubscriptionsRepo::mark_refreshed(&tx, subscription_id, kind, content_hash)? {
            return Err(StorageError::NotFound(format!(
                "subscription {}",
                subscription_id
            )));
        }
        NodesRepo::replace(&tx, subscription_id, nodes)?;
        tx.commit()?;

        debug!(subscription = subscription_id, nodes = nodes.len(), "replaced nodes");
        Ok(())
    }

    /// Mark a subscription as refreshed without changing its nodes.
    pub fn touch_subscription(&self, id: i64) -> Result<()> {
        let conn = self.pool.get()?;
        if SubscriptionsRepo::touch(&conn, id)? {
            Ok(())
        } else {
            Err(StorageError::NotFound(format!("subscription {}", id)))
        }
    }

    // === Nodes ===

    /// Get every node.
    pub fn get_all_nodes(&self) -> Result<Vec<Node>> {
        let conn = self.pool.get()?;
        NodesRepo::get_all(&conn)
    }

    /// Get the nodes of one subscription.
    pub fn get_subscription_nodes(&self, subscription_id: i64) -> Result<Vec<Node>> {
        let conn = self.pool.get()?;
        NodesRepo::get_by_subscription(&conn, subscription_id)
    }

    // === Groups ===

    /// Get all groups.
    pub fn get_all_groups(&self) -> Result<Vec<NodeGroup>> {
        let conn = self.pool.get()?;
        GroupsRepo::get_all(&conn)
    }

    /// Create a group.
    pub fn create_group(&self, new: NewGroup) -> Result<NodeGroup> {
        let conn = self.pool.get()?;
        let id = GroupsRepo::insert(&conn, &new)?;
        Ok(new.into_group(id))
    }

    /// Update a group.
    pub fn update_group(&self, group: &NodeGroup) -> Result<bool> {
        let conn = self.pool.get()?;
        GroupsRepo::update(&conn, group)
    }

    /// Delete a group. The catch-all group is refused.
    pub fn delete_group(&self, id: i64) -> Result<bool> {
        let conn = self.pool.get()?;
        match GroupsRepo::get_by_id(&conn, id)? {
            Some(group) if group.is_catch_all() => Err(StorageError::Conflict(
                "the catch-all group cannot be deleted".to_string(),
            )),
            Some(_) => GroupsRepo::delete(&conn, id),
            None => Ok(false),
        }
    }

    // === Rule sets ===

    /// Get the rule-set registry.
    pub fn get_all_rule_sets(&self) -> Result<Vec<RuleSet>> {
        let conn = self.pool.get()?;
        RuleSetsRepo::get_all(&conn)
    }

    /// Toggle a rule set and return it.
    pub fn set_rule_set_enabled(&self, tag: &str, enabled: bool) -> Result<Option<RuleSet>> {
        let conn = self.pool.get()?;
        if !RuleSetsRepo::set_enabled(&conn, tag, enabled)? {
            return Ok(None);
        }
        RuleSetsRepo::get(&conn, tag)
    }

    /// Record a rule-set download.
    pub fn mark_rule_set_updated(&self, tag: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.pool.get()?;
        if RuleSetsRepo::set_updated_at(&conn, tag, at)? {
            Ok(())
        } else {
            Err(StorageError::NotFound(format!("rule set {}", tag)))
        }
    }
}

// =============================================================================
// ConfigStore
// =============================================================================

impl ConfigStore for Database {
    fn get_settings(&self) -> store::Result<Settings> {
        Ok(Database::get_settings(self)?)
    }

    fn save_settings(&self, settings: &Settings) -> store::Result<()> {
        Ok(Database::save_settings(self, settings)?)
    }

    fn list_subscriptions(&self) -> store::Result<Vec<Subscription>> {
        Ok(self.get_all_subscriptions()?)
    }

    fn get_subscription(&self, id: i64) -> store::Result<Option<Subscription>> {
        Ok(Database::get_subscription(self, id)?)
    }

    fn create_subscription(&self, new: NewSubscription) -> store::Result<Subscription> {
        Ok(Database::create_subscription(self, &new)?)
    }

    fn delete_subscription(&self, id: i64) -> store::Result<bool> {
        Ok(Database::delete_subscription(self, id)?)
    }

    fn replace_nodes(
        &self,
        subscription_id: i64,
        kind: SubscriptionType,
        content_hash: &str,
        nodes: &[Node],
    ) -> store::Result<()> {
        Ok(Database::replace_nodes(self, subscription_id, kind, content_hash, nodes)?)
    }

    fn touch_subscription(&self, id: i64) -> store::Result<()> {
        Ok(Database::touch_subscription(self, id)?)
    }

    fn get_nodes(&self) -> store::Result<Vec<Node>> {
        Ok(self.get_all_nodes()?)
    }

    fn subscription_nodes(&self, subscription_id: i64) -> store::Result<Vec<Node>> {
        Ok(self.get_subscription_nodes(subscription_id)?)
    }

    fn list_groups(&self) -> store::Result<Vec<NodeGroup>> {
        Ok(self.get_all_groups()?)
    }

    fn create_group(&self, new: NewGroup) -> store::Result<NodeGroup> {
        Ok(Database::create_group(self, new)?)
    }

    fn update_group(&self, group: &NodeGroup) -> store::Result<bool> {
        Ok(Database::update_group(self, group)?)
    }

    fn delete_group(&self, id: i64) -> store::Result<bool> {
        Ok(Database::delete_group(self, id)?)
    }

    fn list_rule_sets(&self) -> store::Result<Vec<RuleSet>> {
        Ok(self.get_all_rule_sets()?)
    }

    fn set_rule_set_enabled(&self, tag: &str, enabled: bool) -> store::Result<Option<RuleSet>> {
        Ok(Database::set_rule_set_enabled(self, tag, enabled)?)
    }

    fn mark_rule_set_updated(&self, tag: &str, at: DateTime<Utc>) -> store::Result<()> {
        Ok(Database::mark_rule_set_updated(self, tag, at)?)
    }
}
