//! Subforge Core - Subscription ingestion, grouping and sing-box config assembly.
//!
//! This crate holds everything that does not depend on a particular storage
//! backend or transport:
//!
//! - Proxy share-link codecs (Shadowsocks, VMess, Trojan, VLESS, Hysteria2, TUIC)
//! - Subscription format detection and decoding (Clash YAML, sing-box JSON, link lists)
//! - Keyword-based node groups
//! - Rule-set registry and routing categories
//! - Config document assembly and atomic output
//! - Downloads, latency probes and the refresh queue
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use subforge_core::{ConfigService, MemoryStore};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! let service = ConfigService::new(store, "/tmp/rules", "/tmp/config.json");
//! service
//!     .add_subscription(subforge_core::NewSubscription {
//!         name: "main".to_string(),
//!         url: "https://example.com/sub".to_string(),
//!     })
//!     .await?;
//! service.generate()?;
//! # Ok(())
//! # }
//! ```

pub mod assembler;
pub mod download;
pub mod group;
pub mod ingest;
pub mod node;
pub mod probe;
pub mod protocol;
pub mod refresh;
pub mod rule_set;
pub mod service;
pub mod settings;
pub mod store;
pub mod subscription;

pub use assembler::{ConfigAssembler, ConfigError, Document};
pub use download::{DownloadError, Downloader};
pub use group::{GroupMode, MatchedGroup, NodeGroup, CATCH_ALL_GROUP};
pub use ingest::{detect_type, IngestError, SubscriptionIngestor, SubscriptionType};
pub use node::{Node, Protocol};
pub use probe::{probe_nodes, ProbeOptions, ProbeResult};
pub use protocol::{CodecError, ProtocolCodec, ProtocolRegistry};
pub use refresh::{EnqueueError, RefreshQueue, DEFAULT_QUEUE_CAPACITY};
pub use rule_set::{built_in_rule_sets, RuleSet, RuleSetType};
pub use service::{ConfigService, RefreshOutcome, ServiceError};
pub use settings::Settings;
pub use store::{ConfigStore, MemoryStore, NewGroup, StoreError};
pub use subscription::{NewSubscription, Subscription};
