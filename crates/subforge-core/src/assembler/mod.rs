//! Config assembly.
//!
//! Turns matched groups, the rule-set registry and settings into the single
//! document the proxy engine reads at startup. The document has six top-level
//! sections: `log`, `dns`, `inbounds`, `outbounds`, `route`, `experimental`.
//! Sections reference each other by tag, so the graph is checked before it
//! is handed out and a document that fails the check is never written.

pub mod dns;
pub mod outbound;
pub mod route;

use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::group::MatchedGroup;
use crate::rule_set::RuleSet;
use crate::settings::Settings;
use crate::store::StoreError;

pub use dns::{build_dns, Dns};
pub use outbound::{build_outbounds, node_outbound, Outbound};
pub use route::{build_route, Route};

/// Errors that abort a generation run.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required input could not be loaded.
    #[error("failed to load {what}: {source}")]
    Upstream {
        /// What was being loaded.
        what: &'static str,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },

    /// Writing the document failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Serializing the document failed.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The assembled graph has dangling or duplicate tags.
    #[error("invalid document: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Wraps a store error for the named input.
    pub fn upstream(what: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| ConfigError::Upstream { what, source }
    }
}

/// Result type for assembly.
pub type Result<T> = std::result::Result<T, ConfigError>;

// =============================================================================
// Document
// =============================================================================

/// The generated engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub log: Log,
    pub dns: Dns,
    pub inbounds: Vec<Inbound>,
    pub outbounds: Vec<Outbound>,
    pub route: Route,
    pub experimental: Experimental,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Log {
    pub level: String,
    pub timestamp: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Inbound {
    Mixed {
        tag: String,
        listen: String,
        listen_port: u16,
        set_system_proxy: bool,
    },
    Tun {
        tag: String,
        address: Vec<String>,
        auto_route: bool,
        strict_route: bool,
        stack: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Experimental {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clash_api: Option<ClashApi>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_file: Option<CacheFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClashApi {
    pub external_controller: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheFile {
    pub enabled: bool,
}

impl Document {
    /// Checks that every tag is unique and every reference resolves.
    pub fn validate(&self) -> Result<()> {
        let mut tags = HashSet::new();
        for outbound in &self.outbounds {
            if !tags.insert(outbound.tag()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate outbound tag {:?}",
                    outbound.tag()
                )));
            }
        }
        for outbound in &self.outbounds {
            if let Some(missing) = outbound
                .references()
                .iter()
                .find(|r| !tags.contains(r.as_str()))
            {
                return Err(ConfigError::Invalid(format!(
                    "{:?} references unknown outbound {:?}",
                    outbound.tag(),
                    missing
                )));
            }
        }

        let declared: HashSet<&str> = self.route.rule_set.iter().map(|r| r.tag.as_str()).collect();
        for rule in &self.route.rules {
            if !tags.contains(rule.outbound()) {
                return Err(ConfigError::Invalid(format!(
                    "route rule targets unknown outbound {:?}",
                    rule.outbound()
                )));
            }
            if let route::RouteRule::Match { matcher, .. } = rule {
                if let Some(tag) = matcher
                    .rule_set
                    .iter()
                    .find(|t| !declared.contains(t.as_str()))
                {
                    return Err(ConfigError::Invalid(format!("undeclared rule set {:?}", tag)));
                }
            }
        }
        if !tags.contains(self.route.final_outbound.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "route final {:?} is not an outbound",
                self.route.final_outbound
            )));
        }

        let servers: HashSet<&str> = self.dns.servers.iter().map(|s| s.tag.as_str()).collect();
        for server in &self.dns.servers {
            if !tags.contains(server.detour.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "dns server {:?} detours through unknown outbound {:?}",
                    server.tag, server.detour
                )));
            }
        }
        for rule in &self.dns.rules {
            if !servers.contains(rule.server.as_str()) {
                return Err(ConfigError::Invalid(format!("unknown dns server {:?}", rule.server)));
            }
        }
        if !servers.contains(self.dns.final_server.as_str()) {
            return Err(ConfigError::Invalid("dns final is not a server".to_string()));
        }
        Ok(())
    }

    /// Returns the number of per-node outbounds.
    pub fn proxy_count(&self) -> usize {
        self.outbounds.iter().filter(|o| o.is_proxy()).count()
    }
}

// =============================================================================
// Assembler
// =============================================================================

/// Builds documents. Holds the directory rule-set files live in.
#[derive(Debug, Clone)]
pub struct ConfigAssembler {
    rule_set_dir: PathBuf,
}

impl ConfigAssembler {
    /// Creates an assembler resolving rule-set paths under `rule_set_dir`.
    pub fn new(rule_set_dir: impl Into<PathBuf>) -> Self {
        Self {
            rule_set_dir: rule_set_dir.into(),
        }
    }

    /// Returns the rule-set directory.
    pub fn rule_set_dir(&self) -> &Path {
        &self.rule_set_dir
    }

    /// Assembles and validates a document.
    pub fn assemble(
        &self,
        settings: &Settings,
        groups: &[MatchedGroup],
        rule_sets: &[RuleSet],
    ) -> Result<Document> {
        let outbounds = build_outbounds(groups);
        let route = build_route(rule_sets, &self.rule_set_dir);
        let dns = build_dns(&settings.dns, &route.rule_set);

        let document = Document {
            log: Log {
                level: settings.log_level.clone(),
                timestamp: true,
            },
            dns,
            inbounds: build_inbounds(settings),
            outbounds,
            route,
            experimental: build_experimental(settings),
        };
        document.validate()?;

        info!(
            outbounds = document.outbounds.len(),
            proxies = document.proxy_count(),
            rules = document.route.rules.len(),
            "assembled config"
        );
        Ok(document)
    }
}

fn build_inbounds(settings: &Settings) -> Vec<Inbound> {
    let inbound = &settings.inbound;
    let mut inbounds = vec![Inbound::Mixed {
        tag: "mixed-in".to_string(),
        listen: inbound.listen.clone(),
        listen_port: inbound.mixed_port,
        set_system_proxy: inbound.set_system_proxy,
    }];
    if inbound.tun_enabled {
        inbounds.push(Inbound::Tun {
            tag: "tun-in".to_string(),
            address: vec![inbound.tun_address.clone()],
            auto_route: true,
            strict_route: true,
            stack: inbound.tun_stack.clone(),
        });
    }
    inbounds
}

fn build_experimental(settings: &Settings) -> Experimental {
    let exp = &settings.experimental;
    Experimental {
        clash_api: (!exp.clash_api.is_empty()).then(|| ClashApi {
            external_controller: exp.clash_api.clone(),
        }),
        cache_file: exp.cache_file.then_some(CacheFile { enabled: true }),
    }
}

// =============================================================================
// Output
// =============================================================================

/// Writes `bytes` to `path` through a sibling temp file and a rename, so
/// readers see either the old or the new content.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let result = (|| -> io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Serializes and atomically writes a document.
pub fn write_document(document: &Document, path: &Path) -> Result<()> {
    let body = serde_json::to_vec_pretty(document)?;
    write_atomic(path, &body)?;
    debug!(path = %path.display(), bytes = body.len(), "wrote config");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{build_memberships, NodeGroup, CATCH_ALL_GROUP};
    use crate::node::{Node, Protocol};
    use crate::rule_set::{built_in_rule_sets, NODE_SELECT};

    fn nodes() -> Vec<Node> {
        ["香港 HK-01", "香港 HK-02", "日本 JP-01"]
            .iter()
            .map(|name| {
                let mut n = Node::new(Protocol::Trojan, *name, "a.com", 443);
                n.password = format!("pw-{}", name);
                n.with_generated_id()
            })
            .collect()
    }

    fn groups() -> Vec<NodeGroup> {
        vec![
            NodeGroup::new(1, CATCH_ALL_GROUP),
            NodeGroup::new(2, "香港").with_include(&["hk"]),
        ]
    }

    fn assemble() -> Document {
        let matched = build_memberships(&groups(), &nodes());
        ConfigAssembler::new("/rules")
            .assemble(&Settings::default(), &matched, &built_in_rule_sets())
            .unwrap()
    }

    #[test]
    fn document_has_all_sections() {
        let json = serde_json::to_value(assemble()).unwrap();
        for key in ["log", "dns", "inbounds", "outbounds", "route", "experimental"] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(json["log"]["level"], "info");
        assert_eq!(json["inbounds"][0]["type"], "mixed");
        assert_eq!(json["inbounds"][0]["listen_port"], 7890);
        assert_eq!(json["experimental"]["clash_api"]["external_controller"], "127.0.0.1:9090");
        assert_eq!(json["route"]["final"], NODE_SELECT);
    }

    #[test]
    fn five_proxies_across_two_groups() {
        let document = assemble();
        // catch-all holds 3 nodes, 香港 holds 2
        assert_eq!(document.proxy_count(), 5);
    }

    #[test]
    fn tun_inbound_is_optional() {
        let mut settings = Settings::default();
        settings.inbound.tun_enabled = true;
        let document = ConfigAssembler::new("/rules")
            .assemble(&settings, &[], &built_in_rule_sets())
            .unwrap();
        assert_eq!(document.inbounds.len(), 2);
        let json = serde_json::to_value(&document.inbounds[1]).unwrap();
        assert_eq!(json["type"], "tun");
        assert_eq!(json["address"][0], "172.19.0.1/30");
    }

    #[test]
    fn colliding_group_name_is_rejected() {
        let groups = vec![NodeGroup::new(1, "direct")];
        let matched = build_memberships(&groups, &nodes());
        let err = ConfigAssembler::new("/rules")
            .assemble(&Settings::default(), &matched, &built_in_rule_sets())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn validate_catches_dangling_reference() {
        let mut document = assemble();
        document.outbounds.push(Outbound::Selector {
            tag: "broken".into(),
            outbounds: vec!["nowhere".into()],
            default: None,
        });
        assert!(matches!(document.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn write_document_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("config.json");
        write_document(&assemble(), &path).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(written["outbounds"].is_array());
        assert!(!path.with_file_name("config.json.tmp").exists());
    }
}
