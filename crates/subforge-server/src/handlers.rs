//! API route handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::{debug, info};

use subforge_core::{
    Document, NewGroup, NewSubscription, NodeGroup, RuleSet, Settings, Subscription,
};

use crate::error::{ApiError, Result};
use crate::models::{
    GroupsResponse, MembersResponse, NodesResponse, ProbeRequest, ProbeResponse,
    RefreshQueuedResponse, RuleSetToggleRequest, RuleSetsResponse, SubscriptionsResponse,
};
use crate::state::AppState;

// === Subscriptions ===

/// GET /api/subscriptions - List subscriptions.
pub async fn list_subscriptions(
    State(state): State<AppState>,
) -> Result<Json<SubscriptionsResponse>> {
    let subscriptions = state.service.subscriptions()?;
    Ok(Json(SubscriptionsResponse { subscriptions }))
}

/// POST /api/subscriptions - Create a subscription and ingest it immediately.
pub async fn create_subscription(
    State(state): State<AppState>,
    Json(req): Json<NewSubscription>,
) -> Result<(StatusCode, Json<Subscription>)> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    let subscription = state.service.add_subscription(req).await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

/// POST /api/subscriptions/{id}/refresh - Queue a refresh.
pub async fn refresh_subscription(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<RefreshQueuedResponse>)> {
    if state.service.store().get_subscription(id)?.is_none() {
        return Err(ApiError::NotFound(format!("subscription {}", id)));
    }
    state.refresh.enqueue(id)?;
    debug!(subscription = id, "refresh queued");
    Ok((
        StatusCode::ACCEPTED,
        Json(RefreshQueuedResponse {
            queued: true,
            subscription_id: id,
        }),
    ))
}

/// DELETE /api/subscriptions/{id} - Delete a subscription and its nodes.
pub async fn delete_subscription(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    state.service.delete_subscription(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// === Nodes ===

/// GET /api/nodes - List every node.
pub async fn list_nodes(State(state): State<AppState>) -> Result<Json<NodesResponse>> {
    let nodes = state.service.nodes()?;
    let total = nodes.len();
    Ok(Json(NodesResponse { nodes, total }))
}

/// POST /api/nodes/probe - TCP latency probe.
pub async fn probe_nodes(
    State(state): State<AppState>,
    Json(req): Json<ProbeRequest>,
) -> Result<Json<ProbeResponse>> {
    let results = state.service.probe(req.ids.as_deref()).await?;
    Ok(Json(ProbeResponse { results }))
}

// === Groups ===

/// GET /api/groups - List group definitions.
pub async fn list_groups(State(state): State<AppState>) -> Result<Json<GroupsResponse>> {
    let groups = state.service.groups()?;
    Ok(Json(GroupsResponse { groups }))
}

/// GET /api/groups/members - Current group membership.
pub async fn group_members(State(state): State<AppState>) -> Result<Json<MembersResponse>> {
    let groups = state.service.memberships()?;
    Ok(Json(MembersResponse { groups }))
}

/// POST /api/groups - Create a group.
pub async fn create_group(
    State(state): State<AppState>,
    Json(req): Json<NewGroup>,
) -> Result<(StatusCode, Json<NodeGroup>)> {
    let group = state.service.create_group(req)?;
    info!(group = %group.name, "group created");
    Ok((StatusCode::CREATED, Json(group)))
}

/// PUT /api/groups/{id} - Replace a group definition.
pub async fn update_group(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<NewGroup>,
) -> Result<Json<NodeGroup>> {
    let group = state.service.update_group(req.into_group(id))?;
    Ok(Json(group))
}

/// DELETE /api/groups/{id} - Delete a group.
pub async fn delete_group(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    state.service.delete_group(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// === Rule sets ===

/// GET /api/rulesets - List the rule-set registry.
pub async fn list_rule_sets(State(state): State<AppState>) -> Result<Json<RuleSetsResponse>> {
    let rule_sets = state.service.rule_sets()?;
    Ok(Json(RuleSetsResponse { rule_sets }))
}

/// PUT /api/rulesets/{tag} - Enable or disable a rule set.
pub async fn toggle_rule_set(
    State(state): State<AppState>,
    Path(tag): Path<String>,
    Json(req): Json<RuleSetToggleRequest>,
) -> Result<Json<RuleSet>> {
    let set = state.service.set_rule_set_enabled(&tag, req.enabled)?;
    Ok(Json(set))
}

/// POST /api/rulesets/{tag}/refresh - Download a rule-set file.
pub async fn refresh_rule_set(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> Result<Json<RuleSet>> {
    let set = state.service.refresh_rule_set(&tag).await?;
    Ok(Json(set))
}

// === Settings ===

/// GET /api/settings - Current settings.
pub async fn get_settings(State(state): State<AppState>) -> Result<Json<Settings>> {
    Ok(Json(state.service.settings()?))
}

/// PUT /api/settings - Replace settings.
pub async fn update_settings(
    State(state): State<AppState>,
    Json(settings): Json<Settings>,
) -> Result<Json<Settings>> {
    state.service.save_settings(&settings)?;
    Ok(Json(settings))
}

// === Config ===

/// POST /api/config/generate - Assemble and write the document.
pub async fn generate_config(State(state): State<AppState>) -> Result<Json<Document>> {
    let document = state.service.generate()?;
    Ok(Json(document))
}
