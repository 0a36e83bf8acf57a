//! API request and response models.
//!
//! Domain records (subscriptions, nodes, groups, rule sets, settings) are
//! serialized as-is; this module only holds the envelopes around them.

use serde::{Deserialize, Serialize};
use subforge_core::{MatchedGroup, Node, NodeGroup, ProbeResult, RuleSet, Subscription};

/// Response body for GET /api/subscriptions.
#[derive(Debug, Serialize)]
pub struct SubscriptionsResponse {
    pub subscriptions: Vec<Subscription>,
}

/// Response body for POST /api/subscriptions/{id}/refresh.
#[derive(Debug, Serialize)]
pub struct RefreshQueuedResponse {
    /// Always true; a full queue is reported as an error instead.
    pub queued: bool,
    pub subscription_id: i64,
}

/// Response body for GET /api/nodes.
#[derive(Debug, Serialize)]
pub struct NodesResponse {
    pub nodes: Vec<Node>,
    pub total: usize,
}

/// Request body for POST /api/nodes/probe.
#[derive(Debug, Default, Deserialize)]
pub struct ProbeRequest {
    /// Node ids to probe (all nodes when absent).
    #[serde(default)]
    pub ids: Option<Vec<String>>,
}

/// Response body for POST /api/nodes/probe.
#[derive(Debug, Serialize)]
pub struct ProbeResponse {
    /// Reachable nodes only.
    pub results: Vec<ProbeResult>,
}

/// Response body for GET /api/groups.
#[derive(Debug, Serialize)]
pub struct GroupsResponse {
    pub groups: Vec<NodeGroup>,
}

/// Response body for GET /api/groups/members.
#[derive(Debug, Serialize)]
pub struct MembersResponse {
    pub groups: Vec<MatchedGroup>,
}

/// Response body for GET /api/rulesets.
#[derive(Debug, Serialize)]
pub struct RuleSetsResponse {
    pub rule_sets: Vec<RuleSet>,
}

/// Request body for PUT /api/rulesets/{tag}.
#[derive(Debug, Deserialize)]
pub struct RuleSetToggleRequest {
    pub enabled: bool,
}
