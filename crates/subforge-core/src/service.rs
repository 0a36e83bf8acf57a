//! Entry points shared by the HTTP API and the CLI.
//!
//! [`ConfigService`] ties the store, the codec registry, the downloader and
//! the assembler together. Node replacement, membership rebuilds and document
//! generation run under one guard so a document is never assembled from a
//! half-written snapshot.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::assembler::outbound::auto_tag;
use crate::assembler::{write_document, ConfigAssembler, ConfigError, Document};
use crate::download::{DownloadError, Downloader};
use crate::group::{build_memberships, MatchedGroup, NodeGroup, CATCH_ALL_GROUP};
use crate::ingest::{IngestError, SubscriptionIngestor};
use crate::node::Node;
use crate::probe::{probe_nodes, ProbeOptions, ProbeResult};
use crate::protocol::ProtocolRegistry;
use crate::rule_set::{
    RuleSet, NODE_SELECT, OUTBOUND_BLOCK, OUTBOUND_DIRECT, OUTBOUND_DNS, RULE_GROUPS,
};
use crate::settings::Settings;
use crate::store::{ConfigStore, NewGroup, StoreError};
use crate::subscription::{content_hash, NewSubscription, Subscription};

/// Errors returned by service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The subscription body yielded no nodes.
    #[error(transparent)]
    Ingest(#[from] IngestError),

    /// Fetching a remote resource failed.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Document generation failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The addressed record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request is malformed.
    #[error("invalid request: {0}")]
    Invalid(String),
}

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Result of a subscription refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Nodes were replaced.
    Updated {
        /// New node count.
        nodes: usize,
    },
    /// The body hashed identically to the last one; nothing changed.
    Unchanged,
}

/// Core entry points.
pub struct ConfigService {
    store: Arc<dyn ConfigStore>,
    registry: Arc<ProtocolRegistry>,
    assembler: ConfigAssembler,
    output_path: PathBuf,
    guard: Mutex<()>,
}

impl std::fmt::Debug for ConfigService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigService")
            .field("registry", &self.registry)
            .field("assembler", &self.assembler)
            .field("output_path", &self.output_path)
            .finish()
    }
}

impl ConfigService {
    /// Creates a service with the built-in protocol registry.
    pub fn new(
        store: Arc<dyn ConfigStore>,
        rule_set_dir: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self::with_registry(
            store,
            Arc::new(ProtocolRegistry::with_defaults()),
            rule_set_dir,
            output_path,
        )
    }

    /// Creates a service with an explicit protocol registry.
    pub fn with_registry(
        store: Arc<dyn ConfigStore>,
        registry: Arc<ProtocolRegistry>,
        rule_set_dir: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            registry,
            assembler: ConfigAssembler::new(rule_set_dir),
            output_path: output_path.into(),
            guard: Mutex::new(()),
        }
    }

    /// Returns the store.
    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    /// Returns the protocol registry.
    pub fn registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    /// Returns where generated documents are written.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // The guard protects no data, so a poisoned lock is still usable.
        self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn downloader(&self) -> Result<Downloader> {
        let settings = self.store.get_settings()?;
        Ok(Downloader::from_settings(&settings.network)?)
    }

    // === Settings ===

    /// Returns the current settings.
    pub fn settings(&self) -> Result<Settings> {
        Ok(self.store.get_settings()?)
    }

    /// Replaces the settings.
    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        if settings.inbound.mixed_port == 0 {
            return Err(ServiceError::Invalid("mixed_port must be non-zero".to_string()));
        }
        self.store.save_settings(settings)?;
        info!("settings saved");
        Ok(())
    }

    // === Subscriptions ===

    /// Decodes a subscription body without storing anything.
    pub fn import(&self, content: &str) -> Result<Vec<Node>> {
        let (_, nodes) = SubscriptionIngestor::new(&self.registry).ingest(content)?;
        Ok(nodes)
    }

    /// Lists subscriptions.
    pub fn subscriptions(&self) -> Result<Vec<Subscription>> {
        Ok(self.store.list_subscriptions()?)
    }

    /// Downloads and ingests a new subscription, then stores it with its nodes.
    ///
    /// Nothing is stored when the download or ingestion fails.
    pub async fn add_subscription(&self, new: NewSubscription) -> Result<Subscription> {
        validate_url(&new.url)?;
        let body = self.downloader()?.fetch(&new.url).await?;
        let text = String::from_utf8_lossy(&body);
        let (kind, nodes) = SubscriptionIngestor::new(&self.registry).ingest(&text)?;

        let created = self.store.create_subscription(new)?;
        let stored = {
            let _guard = self.lock();
            self.store
                .replace_nodes(created.id, kind, &content_hash(&body), &nodes)
        };
        if let Err(e) = stored {
            // Roll back the empty record so a retry starts clean.
            if let Err(rollback) = self.store.delete_subscription(created.id) {
                warn!(
                    subscription = created.id,
                    error = %rollback,
                    "failed to roll back subscription record"
                );
            }
            return Err(e.into());
        }

        info!(subscription = created.id, nodes = nodes.len(), format = %kind, "subscription added");
        self.store
            .get_subscription(created.id)?
            .ok_or_else(|| ServiceError::NotFound(format!("subscription {}", created.id)))
    }

    /// Re-downloads a subscription and replaces its nodes.
    ///
    /// On any failure the previous nodes stay in place.
    pub async fn refresh_subscription(&self, id: i64) -> Result<RefreshOutcome> {
        let subscription = self
            .store
            .get_subscription(id)?
            .ok_or_else(|| ServiceError::NotFound(format!("subscription {}", id)))?;

        let body = self.downloader()?.fetch(&subscription.url).await?;
        let hash = content_hash(&body);
        if subscription.content_hash.as_deref() == Some(hash.as_str()) {
            self.store.touch_subscription(id)?;
            return Ok(RefreshOutcome::Unchanged);
        }

        let text = String::from_utf8_lossy(&body);
        let (kind, nodes) = SubscriptionIngestor::new(&self.registry).ingest(&text)?;
        {
            let _guard = self.lock();
            self.store.replace_nodes(id, kind, &hash, &nodes)?;
        }
        Ok(RefreshOutcome::Updated { nodes: nodes.len() })
    }

    /// Deletes a subscription and its nodes.
    pub fn delete_subscription(&self, id: i64) -> Result<()> {
        let _guard = self.lock();
        if self.store.delete_subscription(id)? {
            info!(subscription = id, "subscription deleted");
            Ok(())
        } else {
            Err(ServiceError::NotFound(format!("subscription {}", id)))
        }
    }

    // === Nodes ===

    /// Returns every stored node.
    pub fn nodes(&self) -> Result<Vec<Node>> {
        Ok(self.store.get_nodes()?)
    }

    /// Probes stored nodes; `ids` narrows the set when given.
    pub async fn probe(&self, ids: Option<&[String]>) -> Result<Vec<ProbeResult>> {
        let settings = self.store.get_settings()?;
        let mut nodes = self.store.get_nodes()?;
        if let Some(ids) = ids {
            nodes.retain(|n| ids.contains(&n.id));
        }
        let options = ProbeOptions {
            concurrency: settings.network.probe_concurrency,
            timeout: Duration::from_millis(settings.network.probe_timeout_ms.max(1)),
        };
        Ok(probe_nodes(&nodes, options).await)
    }

    // === Groups ===

    /// Lists group definitions.
    pub fn groups(&self) -> Result<Vec<NodeGroup>> {
        Ok(self.store.list_groups()?)
    }

    /// Recomputes group membership from the current snapshot.
    pub fn memberships(&self) -> Result<Vec<MatchedGroup>> {
        let _guard = self.lock();
        let groups = self.store.list_groups()?;
        let nodes = self.store.get_nodes()?;
        Ok(build_memberships(&groups, &nodes))
    }

    /// Creates a group.
    pub fn create_group(&self, new: NewGroup) -> Result<NodeGroup> {
        let _guard = self.lock();
        validate_group_name(&new.name, None, &self.store.list_groups()?)?;
        Ok(self.store.create_group(new)?)
    }

    /// Replaces a group definition. The catch-all group keeps its name.
    pub fn update_group(&self, group: NodeGroup) -> Result<NodeGroup> {
        let _guard = self.lock();
        let groups = self.store.list_groups()?;
        let existing = groups
            .iter()
            .find(|g| g.id == group.id)
            .ok_or_else(|| ServiceError::NotFound(format!("group {}", group.id)))?;
        if existing.is_catch_all() && !group.is_catch_all() {
            return Err(ServiceError::Invalid("the catch-all group cannot be renamed".to_string()));
        }
        validate_group_name(&group.name, Some(group.id), &groups)?;
        if !self.store.update_group(&group)? {
            return Err(ServiceError::NotFound(format!("group {}", group.id)));
        }
        Ok(group)
    }

    /// Deletes a group.
    pub fn delete_group(&self, id: i64) -> Result<()> {
        let _guard = self.lock();
        if self.store.delete_group(id)? {
            Ok(())
        } else {
            Err(ServiceError::NotFound(format!("group {}", id)))
        }
    }

    // === Rule sets ===

    /// Lists the rule-set registry.
    pub fn rule_sets(&self) -> Result<Vec<RuleSet>> {
        Ok(self.store.list_rule_sets()?)
    }

    /// Enables or disables a rule set.
    pub fn set_rule_set_enabled(&self, tag: &str, enabled: bool) -> Result<RuleSet> {
        let _guard = self.lock();
        self.store
            .set_rule_set_enabled(tag, enabled)?
            .ok_or_else(|| ServiceError::NotFound(format!("rule set {}", tag)))
    }

    /// Downloads a rule-set file to its local path.
    pub async fn refresh_rule_set(&self, tag: &str) -> Result<RuleSet> {
        let set = self
            .store
            .list_rule_sets()?
            .into_iter()
            .find(|s| s.tag == tag)
            .ok_or_else(|| ServiceError::NotFound(format!("rule set {}", tag)))?;
        let path = set.local_path(self.assembler.rule_set_dir());
        self.downloader()?.download_to(&set.url, &path).await?;

        let now = Utc::now();
        self.store.mark_rule_set_updated(tag, now)?;
        Ok(RuleSet {
            updated_at: Some(now),
            ..set
        })
    }

    // === Generation ===

    /// Assembles a document from the current snapshot without writing it.
    pub fn assemble(&self) -> std::result::Result<Document, ConfigError> {
        let _guard = self.lock();
        self.assemble_locked()
    }

    fn assemble_locked(&self) -> std::result::Result<Document, ConfigError> {
        let settings = self
            .store
            .get_settings()
            .map_err(ConfigError::upstream("settings"))?;
        let nodes = self.store.get_nodes().map_err(ConfigError::upstream("nodes"))?;
        let groups = self
            .store
            .list_groups()
            .map_err(ConfigError::upstream("groups"))?;
        let rule_sets = self
            .store
            .list_rule_sets()
            .map_err(ConfigError::upstream("rule sets"))?;

        if nodes.is_empty() {
            warn!("generating config without any nodes");
        }
        let matched = build_memberships(&groups, &nodes);
        self.assembler.assemble(&settings, &matched, &rule_sets)
    }

    /// Assembles a document and atomically replaces the output file.
    ///
    /// The previous file is left untouched when anything fails.
    pub fn generate(&self) -> std::result::Result<Document, ConfigError> {
        let _guard = self.lock();
        let document = self.assemble_locked()?;
        write_document(&document, &self.output_path)?;
        info!(path = %self.output_path.display(), "config written");
        Ok(document)
    }
}

fn validate_url(url: &str) -> Result<()> {
    let parsed = url::Url::parse(url)
        .map_err(|e| ServiceError::Invalid(format!("invalid subscription URL: {}", e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ServiceError::Invalid(format!("unsupported URL scheme {}", other))),
    }
}

/// Group names double as selector tags and, with [`auto_tag`], as latency
/// group tags. Neither may equal a reserved tag or another group's tags.
/// `id` is the group being updated, if any.
fn validate_group_name(name: &str, id: Option<i64>, groups: &[NodeGroup]) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ServiceError::Invalid("group name is empty".to_string()));
    }
    let renaming_catch_all = groups
        .iter()
        .any(|g| Some(g.id) == id && g.is_catch_all());
    let auto = auto_tag(name);

    let reserved = [OUTBOUND_DIRECT, OUTBOUND_BLOCK, OUTBOUND_DNS, NODE_SELECT]
        .into_iter()
        .chain(RULE_GROUPS.iter().map(|g| g.name))
        .chain((!renaming_catch_all).then_some(CATCH_ALL_GROUP));
    for tag in reserved {
        if name == tag || auto == tag {
            return Err(ServiceError::Invalid(format!("group name {} is reserved", name)));
        }
    }

    // Exact duplicates are left to the store, which reports a conflict.
    for other in groups.iter().filter(|g| Some(g.id) != id) {
        let other_name = other.name.trim();
        if name == auto_tag(other_name) || auto == other_name {
            return Err(ServiceError::Invalid(format!(
                "group name {} collides with the latency group of {}",
                name, other_name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::test_server;
    use crate::group::{GroupMode, CATCH_ALL_GROUP};
    use crate::ingest::SubscriptionType;
    use crate::store::MemoryStore;
    use chrono::DateTime;
    use std::sync::atomic::{AtomicBool, Ordering};

    const BODY: &str = "\
trojan://secret@hk1.example.com:443#香港 HK-01
trojan://secret@hk2.example.com:443#香港 HK-02
trojan://secret@jp1.example.com:443#日本 JP-01
";

    fn service_with(store: Arc<MemoryStore>, dir: &Path) -> ConfigService {
        ConfigService::new(store, dir.join("rules"), dir.join("config.json"))
    }

    /// Memory store whose node writes and deletes can be made to fail.
    #[derive(Default)]
    struct FailingStore {
        inner: MemoryStore,
        fail_replace: AtomicBool,
        fail_delete: AtomicBool,
    }

    type StoreResult<T> = std::result::Result<T, StoreError>;

    impl ConfigStore for FailingStore {
        fn get_settings(&self) -> StoreResult<Settings> {
            self.inner.get_settings()
        }
        fn save_settings(&self, settings: &Settings) -> StoreResult<()> {
            self.inner.save_settings(settings)
        }
        fn list_subscriptions(&self) -> StoreResult<Vec<Subscription>> {
            self.inner.list_subscriptions()
        }
        fn get_subscription(&self, id: i64) -> StoreResult<Option<Subscription>> {
            self.inner.get_subscription(id)
        }
        fn create_subscription(&self, new: NewSubscription) -> StoreResult<Subscription> {
            self.inner.create_subscription(new)
        }
        fn delete_subscription(&self, id: i64) -> StoreResult<bool> {
            if self.fail_delete.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("delete failed".into()));
            }
            self.inner.delete_subscription(id)
        }
        fn replace_nodes(
            &self,
            subscription_id: i64,
            kind: SubscriptionType,
            content_hash: &str,
            nodes: &[Node],
        ) -> StoreResult<()> {
            if self.fail_replace.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("replace failed".into()));
            }
            self.inner.replace_nodes(subscription_id, kind, content_hash, nodes)
        }
        fn touch_subscription(&self, id: i64) -> StoreResult<()> {
            self.inner.touch_subscription(id)
        }
        fn get_nodes(&self) -> StoreResult<Vec<Node>> {
            self.inner.get_nodes()
        }
        fn subscription_nodes(&self, subscription_id: i64) -> StoreResult<Vec<Node>> {
            self.inner.subscription_nodes(subscription_id)
        }
        fn list_groups(&self) -> StoreResult<Vec<NodeGroup>> {
            self.inner.list_groups()
        }
        fn create_group(&self, new: NewGroup) -> StoreResult<NodeGroup> {
            self.inner.create_group(new)
        }
        fn update_group(&self, group: &NodeGroup) -> StoreResult<bool> {
            self.inner.update_group(group)
        }
        fn delete_group(&self, id: i64) -> StoreResult<bool> {
            self.inner.delete_group(id)
        }
        fn list_rule_sets(&self) -> StoreResult<Vec<RuleSet>> {
            self.inner.list_rule_sets()
        }
        fn set_rule_set_enabled(&self, tag: &str, enabled: bool) -> StoreResult<Option<RuleSet>> {
            self.inner.set_rule_set_enabled(tag, enabled)
        }
        fn mark_rule_set_updated(&self, tag: &str, at: DateTime<Utc>) -> StoreResult<()> {
            self.inner.mark_rule_set_updated(tag, at)
        }
    }

    fn hk_group() -> NewGroup {
        NewGroup {
            name: "香港".into(),
            mode: GroupMode::Auto,
            include_patterns: vec!["hk|hongkong".into()],
            exclude_patterns: vec!["01".into()],
            active: true,
        }
    }

    fn new_sub(url: String) -> NewSubscription {
        NewSubscription {
            name: "main".into(),
            url,
        }
    }

    #[tokio::test]
    async fn add_then_generate() {
        let base = test_server::serve(200, BODY).await;
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(Arc::new(MemoryStore::new()), dir.path());

        let sub = service
            .add_subscription(new_sub(format!("{}/sub", base)))
            .await
            .unwrap();
        assert_eq!(sub.node_count, 3);
        assert_eq!(sub.kind, SubscriptionType::V2rayText);
        assert!(sub.content_hash.is_some());

        service.create_group(hk_group()).unwrap();
        let members = service.memberships().unwrap();
        let hk = members.iter().find(|m| m.group.name == "香港").unwrap();
        assert_eq!(hk.nodes.len(), 1);
        assert_eq!(hk.nodes[0].name, "香港 HK-02");
        let all = members.iter().find(|m| m.group.name == CATCH_ALL_GROUP).unwrap();
        assert_eq!(all.nodes.len(), 3);

        let document = service.generate().unwrap();
        assert_eq!(document.proxy_count(), 4);
        let written = std::fs::read_to_string(service.output_path()).unwrap();
        assert!(written.contains("\"outbounds\""));
    }

    #[tokio::test]
    async fn unchanged_body_skips_reingest() {
        let base = test_server::serve(200, BODY).await;
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(Arc::new(MemoryStore::new()), dir.path());
        let sub = service
            .add_subscription(new_sub(format!("{}/sub", base)))
            .await
            .unwrap();

        let outcome = service.refresh_subscription(sub.id).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Unchanged);
    }

    #[tokio::test]
    async fn failed_add_stores_nothing() {
        let base = test_server::serve(200, "no links here").await;
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone(), dir.path());

        let err = service
            .add_subscription(new_sub(format!("{}/sub", base)))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Ingest(IngestError::Empty)));
        assert!(store.list_subscriptions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_node_write_rolls_back_the_record() {
        let base = test_server::serve(200, BODY).await;
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FailingStore::default());
        store.fail_replace.store(true, Ordering::SeqCst);
        let service = ConfigService::new(
            store.clone(),
            dir.path().join("rules"),
            dir.path().join("config.json"),
        );

        let err = service
            .add_subscription(new_sub(format!("{}/sub", base)))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::Backend(_))));
        assert!(store.inner.list_subscriptions().unwrap().is_empty());

        // A failed rollback still reports the write error.
        store.fail_delete.store(true, Ordering::SeqCst);
        let err = service
            .add_subscription(new_sub(format!("{}/sub", base)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Store(StoreError::Backend(ref msg)) if msg == "replace failed"
        ));
        assert_eq!(store.inner.list_subscriptions().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_nodes() {
        let broken = test_server::serve(500, "oops").await;
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone(), dir.path());

        let sub = store
            .create_subscription(new_sub(format!("{}/sub", broken)))
            .unwrap();
        let nodes = service.import(BODY).unwrap();
        store
            .replace_nodes(sub.id, SubscriptionType::V2rayText, "old", &nodes)
            .unwrap();

        let err = service.refresh_subscription(sub.id).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Download(DownloadError::Status { status: 500, .. })
        ));
        assert_eq!(store.subscription_nodes(sub.id).unwrap(), nodes);
    }

    #[tokio::test]
    async fn refresh_of_unknown_subscription_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(Arc::new(MemoryStore::new()), dir.path());
        let err = service.refresh_subscription(99).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn rejects_bad_urls() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(Arc::new(MemoryStore::new()), dir.path());
        for url in ["not a url", "ftp://example.com/sub"] {
            let err = service.add_subscription(new_sub(url.into())).await.unwrap_err();
            assert!(matches!(err, ServiceError::Invalid(_)));
        }
    }

    #[test]
    fn reserved_group_names_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(Arc::new(MemoryStore::new()), dir.path());
        for name in ["direct", NODE_SELECT, "流媒体", "  "] {
            let group = NewGroup {
                name: name.into(),
                ..hk_group()
            };
            assert!(matches!(service.create_group(group), Err(ServiceError::Invalid(_))));
        }
    }

    #[test]
    fn latency_tag_collisions_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(Arc::new(MemoryStore::new()), dir.path());
        let hk = service.create_group(hk_group()).unwrap();

        for name in [
            CATCH_ALL_GROUP.to_string(),
            format!("{}自动", CATCH_ALL_GROUP),
            format!("{}自动", hk.name),
        ] {
            let group = NewGroup {
                name,
                ..hk_group()
            };
            assert!(matches!(service.create_group(group), Err(ServiceError::Invalid(_))));
        }

        // A group whose latency tag would equal an existing group's name.
        let plain = service
            .create_group(NewGroup {
                name: "美国自动".into(),
                ..hk_group()
            })
            .unwrap();
        let group = NewGroup {
            name: "美国".into(),
            ..hk_group()
        };
        assert!(matches!(service.create_group(group), Err(ServiceError::Invalid(_))));

        let mut renamed = plain;
        renamed.name = format!("{}自动", hk.name);
        assert!(matches!(service.update_group(renamed), Err(ServiceError::Invalid(_))));
    }

    #[test]
    fn catch_all_keeps_its_name_on_update() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(Arc::new(MemoryStore::new()), dir.path());
        let mut all = service.groups().unwrap().remove(0);
        all.active = false;
        assert!(service.update_group(all).is_ok());
    }

    #[test]
    fn catch_all_cannot_be_renamed() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(Arc::new(MemoryStore::new()), dir.path());
        let mut all = service.groups().unwrap().remove(0);
        all.name = "renamed".into();
        assert!(matches!(service.update_group(all), Err(ServiceError::Invalid(_))));
    }

    #[test]
    fn failed_generation_leaves_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone(), dir.path());
        std::fs::write(service.output_path(), "previous").unwrap();

        // Collides with the catch-all group's latency tag.
        store
            .create_group(NewGroup {
                name: format!("{}自动", CATCH_ALL_GROUP),
                ..hk_group()
            })
            .unwrap();
        let sub = store
            .create_subscription(new_sub("https://example.com/s".into()))
            .unwrap();
        store
            .replace_nodes(sub.id, SubscriptionType::V2rayText, "h", &service.import(BODY).unwrap())
            .unwrap();

        assert!(matches!(service.generate(), Err(ConfigError::Invalid(_))));
        assert_eq!(
            std::fs::read_to_string(service.output_path()).unwrap(),
            "previous"
        );
    }

    #[tokio::test]
    async fn refresh_rule_set_downloads_and_stamps() {
        let base = test_server::serve(200, "SRS").await;
        let dir = tempfile::tempdir().unwrap();
        let mut set = crate::rule_set::built_in_rule_sets()
            .into_iter()
            .find(|s| s.tag == "geoip-cn")
            .unwrap();
        set.url = format!("{}/geoip-cn.srs", base);
        let store = Arc::new(MemoryStore::new().with_rule_sets(vec![set]));
        let service = service_with(store.clone(), dir.path());

        let updated = service.refresh_rule_set("geoip-cn").await.unwrap();
        assert!(updated.updated_at.is_some());
        assert!(store.list_rule_sets().unwrap()[0].updated_at.is_some());
        let file = dir.path().join("rules").join("geoip-cn.srs");
        assert_eq!(std::fs::read(file).unwrap(), b"SRS");

        let err = service.refresh_rule_set("missing").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn toggling_rule_sets() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(Arc::new(MemoryStore::new()), dir.path());
        let set = service.set_rule_set_enabled("geoip-cn", false).unwrap();
        assert!(!set.enabled);
        assert!(matches!(
            service.set_rule_set_enabled("nope", true),
            Err(ServiceError::NotFound(_))
        ));
    }
}
