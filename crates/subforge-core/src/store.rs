//! Persistence interface used by the service layer.
//!
//! The SQLite implementation lives in `subforge-storage`; [`MemoryStore`]
//! backs tests and one-shot CLI runs.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::group::{GroupMode, NodeGroup, CATCH_ALL_GROUP};
use crate::ingest::SubscriptionType;
use crate::node::Node;
use crate::rule_set::{built_in_rule_sets, RuleSet};
use crate::settings::Settings;
use crate::subscription::{NewSubscription, Subscription};

/// Errors surfaced by a [`ConfigStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The addressed record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The write would violate a uniqueness or reservation rule.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The backend failed.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Parameters for creating or replacing a group definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGroup {
    /// Display name; must be unique.
    pub name: String,
    /// Selection mode.
    #[serde(default)]
    pub mode: GroupMode,
    /// Include patterns.
    #[serde(default)]
    pub include_patterns: Vec<String>,
    /// Exclude patterns.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Active flag.
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl NewGroup {
    /// Attaches an id.
    pub fn into_group(self, id: i64) -> NodeGroup {
        NodeGroup {
            id,
            name: self.name,
            mode: self.mode,
            include_patterns: self.include_patterns,
            exclude_patterns: self.exclude_patterns,
            active: self.active,
        }
    }
}

/// Everything the core reads from and writes to persistence.
pub trait ConfigStore: Send + Sync {
    // === Settings ===

    /// Loads settings, falling back to defaults when none are stored.
    fn get_settings(&self) -> Result<Settings>;

    /// Replaces the stored settings.
    fn save_settings(&self, settings: &Settings) -> Result<()>;

    // === Subscriptions ===

    /// Lists subscriptions in creation order.
    fn list_subscriptions(&self) -> Result<Vec<Subscription>>;

    /// Gets a subscription.
    fn get_subscription(&self, id: i64) -> Result<Option<Subscription>>;

    /// Creates a subscription without nodes.
    fn create_subscription(&self, new: NewSubscription) -> Result<Subscription>;

    /// Deletes a subscription and all its nodes. Returns false if absent.
    fn delete_subscription(&self, id: i64) -> Result<bool>;

    /// Replaces every node of a subscription and records the refresh.
    fn replace_nodes(
        &self,
        subscription_id: i64,
        kind: SubscriptionType,
        content_hash: &str,
        nodes: &[Node],
    ) -> Result<()>;

    /// Marks a subscription as refreshed without touching its nodes.
    fn touch_subscription(&self, id: i64) -> Result<()>;

    // === Nodes ===

    /// All nodes, grouped by subscription in creation order.
    fn get_nodes(&self) -> Result<Vec<Node>>;

    /// Nodes owned by one subscription.
    fn subscription_nodes(&self, subscription_id: i64) -> Result<Vec<Node>>;

    // === Groups ===

    /// Lists groups in id order.
    fn list_groups(&self) -> Result<Vec<NodeGroup>>;

    /// Creates a group.
    fn create_group(&self, new: NewGroup) -> Result<NodeGroup>;

    /// Replaces a group definition. Returns false if absent.
    fn update_group(&self, group: &NodeGroup) -> Result<bool>;

    /// Deletes a group. The catch-all group cannot be deleted.
    fn delete_group(&self, id: i64) -> Result<bool>;

    // === Rule sets ===

    /// Lists the rule-set registry in seed order.
    fn list_rule_sets(&self) -> Result<Vec<RuleSet>>;

    /// Toggles a rule set. Returns the updated entry, or `None` if absent.
    fn set_rule_set_enabled(&self, tag: &str, enabled: bool) -> Result<Option<RuleSet>>;

    /// Records a successful rule-set download.
    fn mark_rule_set_updated(&self, tag: &str, at: DateTime<Utc>) -> Result<()>;
}

// =============================================================================
// In-memory store
// =============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    settings: Option<Settings>,
    subscriptions: BTreeMap<i64, Subscription>,
    nodes: BTreeMap<i64, Vec<Node>>,
    groups: BTreeMap<i64, NodeGroup>,
    rule_sets: Vec<RuleSet>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// A [`ConfigStore`] held in process memory, seeded like a fresh database.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates a store with the catch-all group and the built-in rule sets.
    pub fn new() -> Self {
        let mut state = MemoryState {
            rule_sets: built_in_rule_sets(),
            ..Default::default()
        };
        let id = state.next_id();
        state.groups.insert(id, NodeGroup::new(id, CATCH_ALL_GROUP));
        Self {
            state: Mutex::new(state),
        }
    }

    /// Replaces the seeded rule-set registry.
    pub fn with_rule_sets(self, rule_sets: Vec<RuleSet>) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.rule_sets = rule_sets;
        }
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("memory store poisoned".to_string()))
    }
}

impl ConfigStore for MemoryStore {
    fn get_settings(&self) -> Result<Settings> {
        Ok(self.lock()?.settings.clone().unwrap_or_default())
    }

    fn save_settings(&self, settings: &Settings) -> Result<()> {
        self.lock()?.settings = Some(settings.clone());
        Ok(())
    }

    fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        Ok(self.lock()?.subscriptions.values().cloned().collect())
    }

    fn get_subscription(&self, id: i64) -> Result<Option<Subscription>> {
        Ok(self.lock()?.subscriptions.get(&id).cloned())
    }

    fn create_subscription(&self, new: NewSubscription) -> Result<Subscription> {
        let mut state = self.lock()?;
        if state.subscriptions.values().any(|s| s.url == new.url) {
            return Err(StoreError::Conflict(format!("subscription {} exists", new.url)));
        }
        let id = state.next_id();
        let subscription = Subscription {
            id,
            name: new.name,
            url: new.url,
            kind: SubscriptionType::Unknown,
            content_hash: None,
            node_count: 0,
            created_at: Utc::now(),
            updated_at: None,
        };
        state.subscriptions.insert(id, subscription.clone());
        Ok(subscription)
    }

    fn delete_subscription(&self, id: i64) -> Result<bool> {
        let mut state = self.lock()?;
        state.nodes.remove(&id);
        Ok(state.subscriptions.remove(&id).is_some())
    }

    fn replace_nodes(
        &self,
        subscription_id: i64,
        kind: SubscriptionType,
        content_hash: &str,
        nodes: &[Node],
    ) -> Result<()> {
        let mut state = self.lock()?;
        let subscription = state
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| StoreError::NotFound(format!("subscription {}", subscription_id)))?;
        subscription.kind = kind;
        subscription.content_hash = Some(content_hash.to_string());
        subscription.node_count = nodes.len();
        subscription.updated_at = Some(Utc::now());
        state.nodes.insert(subscription_id, nodes.to_vec());
        Ok(())
    }

    fn touch_subscription(&self, id: i64) -> Result<()> {
        let mut state = self.lock()?;
        let subscription = state
            .subscriptions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("subscription {}", id)))?;
        subscription.updated_at = Some(Utc::now());
        Ok(())
    }

    fn get_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.lock()?.nodes.values().flatten().cloned().collect())
    }

    fn subscription_nodes(&self, subscription_id: i64) -> Result<Vec<Node>> {
        Ok(self
            .lock()?
            .nodes
            .get(&subscription_id)
            .cloned()
            .unwrap_or_default())
    }

    fn list_groups(&self) -> Result<Vec<NodeGroup>> {
        Ok(self.lock()?.groups.values().cloned().collect())
    }

    fn create_group(&self, new: NewGroup) -> Result<NodeGroup> {
        let mut state = self.lock()?;
        if state.groups.values().any(|g| g.name == new.name) {
            return Err(StoreError::Conflict(format!("group {} exists", new.name)));
        }
        let id = state.next_id();
        let group = new.into_group(id);
        state.groups.insert(id, group.clone());
        Ok(group)
    }

    fn update_group(&self, group: &NodeGroup) -> Result<bool> {
        let mut state = self.lock()?;
        if state
            .groups
            .values()
            .any(|g| g.id != group.id && g.name == group.name)
        {
            return Err(StoreError::Conflict(format!("group {} exists", group.name)));
        }
        match state.groups.get_mut(&group.id) {
            Some(existing) => {
                *existing = group.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_group(&self, id: i64) -> Result<bool> {
        let mut state = self.lock()?;
        if state.groups.get(&id).is_some_and(NodeGroup::is_catch_all) {
            return Err(StoreError::Conflict("the catch-all group cannot be deleted".to_string()));
        }
        Ok(state.groups.remove(&id).is_some())
    }

    fn list_rule_sets(&self) -> Result<Vec<RuleSet>> {
        Ok(self.lock()?.rule_sets.clone())
    }

    fn set_rule_set_enabled(&self, tag: &str, enabled: bool) -> Result<Option<RuleSet>> {
        let mut state = self.lock()?;
        Ok(state.rule_sets.iter_mut().find(|s| s.tag == tag).map(|set| {
            set.enabled = enabled;
            set.clone()
        }))
    }

    fn mark_rule_set_updated(&self, tag: &str, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.lock()?;
        let set = state
            .rule_sets
            .iter_mut()
            .find(|s| s.tag == tag)
            .ok_or_else(|| StoreError::NotFound(format!("rule set {}", tag)))?;
        set.updated_at = Some(at);
        Ok(())
    }
}
