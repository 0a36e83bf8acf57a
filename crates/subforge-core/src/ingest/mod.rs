//! Subscription ingestion.
//!
//! Turns a raw subscription body into an ordered list of canonical [`Node`]s.
//! The body is first classified with [`detect_type`], then handed to the
//! matching parser. Per-entry failures are logged and skipped; only an empty
//! result fails the whole batch.

mod clash;
mod singbox;
mod text;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::node::{Node, Protocol};
use crate::protocol::{decode_base64_text, ProtocolRegistry};

/// Errors that abort a whole ingestion batch.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Every entry was skipped or the body held no entries.
    #[error("subscription contains no usable nodes")]
    Empty,

    /// The body was classified as sing-box JSON but is not valid JSON.
    #[error("invalid JSON subscription: {0}")]
    Json(#[from] serde_json::Error),

    /// The body was classified as Clash YAML but is not valid YAML.
    #[error("invalid YAML subscription: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type for ingestion.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Detected subscription body format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubscriptionType {
    /// Clash / Mihomo YAML with a `proxies` list.
    Clash,
    /// sing-box JSON with an `outbounds` list.
    Singbox,
    /// Newline-delimited share links, possibly base64 wrapped.
    #[default]
    V2rayText,
    /// Newline-delimited `ss://` links only.
    ShadowsocksText,
    /// Not yet classified.
    Unknown,
}

impl SubscriptionType {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionType::Clash => "clash",
            SubscriptionType::Singbox => "singbox",
            SubscriptionType::V2rayText => "v2ray-text",
            SubscriptionType::ShadowsocksText => "shadowsocks-text",
            SubscriptionType::Unknown => "unknown",
        }
    }

    /// Parses a wire name. Unrecognized names map to [`SubscriptionType::Unknown`].
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "clash" => SubscriptionType::Clash,
            "singbox" | "sing-box" => SubscriptionType::Singbox,
            "v2ray-text" | "v2ray" => SubscriptionType::V2rayText,
            "shadowsocks-text" | "ss" => SubscriptionType::ShadowsocksText,
            _ => SubscriptionType::Unknown,
        }
    }
}

impl std::fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of base64 layers peeled off a text subscription.
pub(crate) const MAX_DECODE_PASSES: usize = 2;

/// Top-level Clash keys for the proxy list and the group list. The
/// capitalised forms come from older Clash releases.
const CLASH_PROXY_KEYS: &[&str] = &["proxies:", "Proxy:"];
const CLASH_GROUP_KEYS: &[&str] = &["proxy-groups:", "Proxy Group:"];

/// Classifies a subscription body.
///
/// Order: Clash markers (current or legacy keys), sing-box JSON, scheme scan, scheme scan after one
/// and then two base64 decodes. Anything else falls back to
/// [`SubscriptionType::V2rayText`].
pub fn detect_type(content: &str) -> SubscriptionType {
    let content = content.trim_start_matches('\u{feff}');

    if looks_like_clash(content) {
        return SubscriptionType::Clash;
    }
    if looks_like_singbox(content) {
        return SubscriptionType::Singbox;
    }
    if let Some(kind) = scan_schemes(content) {
        return kind;
    }

    let mut decoded = content.to_string();
    for _ in 0..MAX_DECODE_PASSES {
        match decode_base64_text(&decoded) {
            Some(next) => decoded = next,
            None => break,
        }
        if let Some(kind) = scan_schemes(&decoded) {
            return kind;
        }
    }

    debug!("subscription format not detected, assuming v2ray-text");
    SubscriptionType::V2rayText
}

fn looks_like_clash(content: &str) -> bool {
    let has = |keys: &[&str]| keys.iter().any(|k| content.contains(k));
    has(CLASH_PROXY_KEYS) && has(CLASH_GROUP_KEYS)
}

fn looks_like_singbox(content: &str) -> bool {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(content) else {
        return false;
    };
    value
        .get("outbounds")
        .and_then(|o| o.as_array())
        .map(|outbounds| {
            outbounds.iter().any(|o| {
                o.get("type")
                    .and_then(|t| t.as_str())
                    .and_then(Protocol::parse)
                    .is_some()
            })
        })
        .unwrap_or(false)
}

/// Looks for share-link prefixes at the start of lines.
fn scan_schemes(text: &str) -> Option<SubscriptionType> {
    let mut has_ss = false;
    for line in text.lines().map(str::trim) {
        if ["vmess://", "vless://", "trojan://"]
            .iter()
            .any(|p| line.starts_with(p))
        {
            return Some(SubscriptionType::V2rayText);
        }
        has_ss |= line.starts_with("ss://");
    }
    has_ss.then_some(SubscriptionType::ShadowsocksText)
}

/// Converts subscription bodies into nodes using a protocol registry.
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionIngestor<'a> {
    registry: &'a ProtocolRegistry,
}

impl<'a> SubscriptionIngestor<'a> {
    /// Creates an ingestor backed by `registry`.
    pub fn new(registry: &'a ProtocolRegistry) -> Self {
        Self { registry }
    }

    /// Detects the body format and parses it.
    pub fn ingest(&self, content: &str) -> Result<(SubscriptionType, Vec<Node>)> {
        let kind = detect_type(content);
        let nodes = self.parse(content, kind)?;
        Ok((kind, nodes))
    }

    /// Parses a body of a known format.
    ///
    /// Duplicate nodes (same id) keep their first occurrence.
    pub fn parse(&self, content: &str, kind: SubscriptionType) -> Result<Vec<Node>> {
        let content = content.trim_start_matches('\u{feff}');
        let parsed = match kind {
            SubscriptionType::Clash => clash::parse(content, self.registry)?,
            SubscriptionType::Singbox => singbox::parse(content, self.registry)?,
            SubscriptionType::V2rayText
            | SubscriptionType::ShadowsocksText
            | SubscriptionType::Unknown => text::parse(content, self.registry),
        };

        let mut seen = HashSet::new();
        let nodes: Vec<Node> = parsed
            .into_iter()
            .filter(|n| seen.insert(n.id.clone()))
            .collect();

        if nodes.is_empty() {
            return Err(IngestError::Empty);
        }
        info!(format = %kind, count = nodes.len(), "ingested subscription");
        Ok(nodes)
    }
}

// =============================================================================
// Lenient field shapes shared by the structured parsers
// =============================================================================

/// A scalar that exporters write as either a number or a string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub(crate) enum Scalar {
    Int(u64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Scalar::Int(n) => Some(*n),
            Scalar::Float(f) if *f >= 0.0 && f.fract() == 0.0 => Some(*f as u64),
            Scalar::Float(_) => None,
            Scalar::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_port(&self) -> Option<u16> {
        self.as_u64().and_then(|n| u16::try_from(n).ok())
    }

    /// Renders a bandwidth value; bare numbers are taken as Mbps.
    pub fn as_bandwidth(&self) -> String {
        match self {
            Scalar::Text(s) if s.trim().parse::<u64>().is_err() => s.trim().to_string(),
            other => other
                .as_u64()
                .map(|n| format!("{} Mbps", n))
                .unwrap_or_default(),
        }
    }
}

/// A string or list of strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => crate::protocol::split_list(&s),
            OneOrMany::Many(v) => v.into_iter().filter(|s| !s.is_empty()).collect(),
        }
    }

    pub fn first(&self) -> String {
        match self {
            OneOrMany::One(s) => s.clone(),
            OneOrMany::Many(v) => v.first().cloned().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn b64(s: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(s)
    }

    const SS_LINK: &str = "ss://YWVzLTI1Ni1nY206cGFzcw==@example.com:8388#My-Node";
    const TROJAN_LINK: &str = "trojan://secret@trojan.example.com:443#TJ";

    // ==================== Detection ====================

    #[test]
    fn detect_clash_requires_both_markers() {
        let clash = "proxies:\n  - name: a\nproxy-groups:\n  - name: g\n";
        assert_eq!(detect_type(clash), SubscriptionType::Clash);
        assert_ne!(detect_type("proxies:\n  - name: a\n"), SubscriptionType::Clash);
    }

    #[test]
    fn legacy_clash_keys_are_ingested() {
        let legacy = "Proxy:\n  - {name: t, type: trojan, server: a.com, port: 443, password: p}\n\
                      Proxy Group:\n  - {name: g, type: select, proxies: [t]}\n";
        assert_eq!(detect_type(legacy), SubscriptionType::Clash);

        let registry = ProtocolRegistry::with_defaults();
        let (kind, nodes) = SubscriptionIngestor::new(&registry).ingest(legacy).unwrap();
        assert_eq!(kind, SubscriptionType::Clash);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].protocol, Protocol::Trojan);
        assert_eq!(nodes[0].name, "t");
    }

    #[test]
    fn detect_singbox_needs_proxy_outbound() {
        let sb = r#"{"outbounds":[{"type":"direct","tag":"d"},{"type":"vless","tag":"v"}]}"#;
        assert_eq!(detect_type(sb), SubscriptionType::Singbox);
        let only_sinks = r#"{"outbounds":[{"type":"direct","tag":"d"}]}"#;
        assert_eq!(detect_type(only_sinks), SubscriptionType::V2rayText);
    }

    #[test]
    fn detect_plain_links() {
        assert_eq!(detect_type(SS_LINK), SubscriptionType::ShadowsocksText);
        let mixed = format!("{}\n{}\n", SS_LINK, TROJAN_LINK);
        assert_eq!(detect_type(&mixed), SubscriptionType::V2rayText);
    }

    #[test]
    fn detect_vmess_is_not_mistaken_for_ss() {
        let body = "vmess://eyJhZGQiOiJhLmNvbSJ9";
        assert_eq!(detect_type(body), SubscriptionType::V2rayText);
    }

    #[test]
    fn detect_base64_layers() {
        assert_eq!(detect_type(&b64(SS_LINK)), SubscriptionType::ShadowsocksText);
        let doubled = b64(&b64(TROJAN_LINK));
        assert_eq!(detect_type(&doubled), SubscriptionType::V2rayText);
    }

    #[test]
    fn detect_falls_back_to_v2ray_text() {
        assert_eq!(detect_type("hello world"), SubscriptionType::V2rayText);
        assert_eq!(detect_type(""), SubscriptionType::V2rayText);
    }

    // ==================== Ingestion ====================

    #[test]
    fn double_base64_vmess_is_classified_and_parsed() {
        let vmess_json = serde_json::json!({
            "v": "2", "ps": "US", "add": "us.example.com", "port": "443",
            "id": "b831381d-6324-4d53-ad4f-8cda48b30811", "aid": "0", "net": "tcp"
        });
        let link = format!("vmess://{}", b64(&vmess_json.to_string()));
        let body = b64(&b64(&format!("{}\n", link)));

        let registry = ProtocolRegistry::with_defaults();
        let (kind, nodes) = SubscriptionIngestor::new(&registry).ingest(&body).unwrap();
        assert_eq!(kind, SubscriptionType::V2rayText);
        assert!(!nodes.is_empty());
        assert_eq!(nodes[0].protocol, Protocol::Vmess);
        assert_eq!(nodes[0].address, "us.example.com");
    }

    #[test]
    fn ingest_drops_duplicates() {
        let body = format!("{}\n{}\n{}\n", SS_LINK, TROJAN_LINK, SS_LINK);
        let registry = ProtocolRegistry::with_defaults();
        let (_, nodes) = SubscriptionIngestor::new(&registry).ingest(&body).unwrap();
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn ingest_empty_result_fails() {
        let registry = ProtocolRegistry::with_defaults();
        let err = SubscriptionIngestor::new(&registry)
            .ingest("# nothing here\n\nss://broken\n")
            .unwrap_err();
        assert!(matches!(err, IngestError::Empty));
    }

    #[test]
    fn subscription_type_names() {
        assert_eq!(SubscriptionType::V2rayText.as_str(), "v2ray-text");
        assert_eq!(SubscriptionType::parse("sing-box"), SubscriptionType::Singbox);
        assert_eq!(SubscriptionType::parse("weird"), SubscriptionType::Unknown);
        assert_eq!(
            serde_json::to_value(SubscriptionType::ShadowsocksText).unwrap(),
            "shadowsocks-text"
        );
    }

    #[test]
    fn scalar_bandwidth() {
        assert_eq!(Scalar::Int(100).as_bandwidth(), "100 Mbps");
        assert_eq!(Scalar::Text("50".into()).as_bandwidth(), "50 Mbps");
        assert_eq!(Scalar::Text("1 Gbps".into()).as_bandwidth(), "1 Gbps");
        assert_eq!(Scalar::Text("8388".into()).as_port(), Some(8388));
        assert_eq!(Scalar::Int(70000).as_port(), None);
    }
}
