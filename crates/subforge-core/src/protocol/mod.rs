//! Per-protocol URI codecs and the registry that dispatches between them.
//!
//! Each protocol implements [`ProtocolCodec`]. A [`ProtocolRegistry`] is
//! built once at startup and passed by reference to ingestion and assembly
//! code; adding a protocol means registering one more codec.

mod hysteria2;
mod shadowsocks;
mod trojan;
mod tuic;
mod vless;
mod vmess;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use base64::Engine;
use thiserror::Error;

use crate::node::{Node, Protocol};

pub use hysteria2::Hysteria2Codec;
pub use shadowsocks::{ShadowsocksCodec, SHADOWSOCKS_METHODS};
pub use trojan::TrojanCodec;
pub use tuic::{TuicCodec, CONGESTION_CONTROLS};
pub use vless::{VlessCodec, VLESS_FLOWS};
pub use vmess::VmessCodec;

/// Transports accepted on VMess, VLESS and Trojan nodes.
pub const NETWORKS: &[&str] = &["tcp", "ws", "grpc", "http"];

/// Errors produced while decoding, encoding or validating a node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Malformed URI or missing mandatory component.
    #[error("format error: {0}")]
    Format(String),

    /// An enumerated or ranged field holds a value outside the allowed set.
    #[error("unsupported {field}: {value:?}")]
    UnsupportedValue {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: String,
    },
}

impl CodecError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        CodecError::Format(msg.into())
    }

    pub(crate) fn unsupported(field: &'static str, value: impl Into<String>) -> Self {
        CodecError::UnsupportedValue {
            field,
            value: value.into(),
        }
    }
}

/// Contract implemented by every protocol.
pub trait ProtocolCodec: Send + Sync {
    /// The protocol this codec handles.
    fn protocol(&self) -> Protocol;

    /// URI schemes (without `://`) this codec accepts.
    fn schemes(&self) -> &'static [&'static str];

    /// Decodes a URI into a validated node.
    fn parse_url(&self, uri: &str) -> Result<Node, CodecError>;

    /// Encodes a node as a URI. Validation runs first.
    fn to_url(&self, node: &Node) -> Result<String, CodecError>;

    /// Checks mandatory fields, port range and enumerated values.
    fn validate(&self, node: &Node) -> Result<(), CodecError>;
}

/// Name-keyed registry of protocol codecs.
#[derive(Clone, Default)]
pub struct ProtocolRegistry {
    by_scheme: HashMap<&'static str, Arc<dyn ProtocolCodec>>,
    by_protocol: BTreeMap<Protocol, Arc<dyn ProtocolCodec>>,
}

impl ProtocolRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with all built-in codecs.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ShadowsocksCodec);
        registry.register(VmessCodec);
        registry.register(TrojanCodec);
        registry.register(VlessCodec);
        registry.register(Hysteria2Codec);
        registry.register(TuicCodec);
        registry
    }

    /// Registers a codec under its protocol and all of its schemes.
    pub fn register<C: ProtocolCodec + 'static>(&mut self, codec: C) {
        let codec: Arc<dyn ProtocolCodec> = Arc::new(codec);
        for scheme in codec.schemes().iter().copied() {
            self.by_scheme.insert(scheme, Arc::clone(&codec));
        }
        self.by_protocol.insert(codec.protocol(), codec);
    }

    /// Looks up a codec by URI scheme.
    pub fn get(&self, scheme: &str) -> Option<&dyn ProtocolCodec> {
        self.by_scheme
            .get(scheme.to_ascii_lowercase().as_str())
            .map(|c| c.as_ref())
    }

    /// Looks up a codec by protocol.
    pub fn for_protocol(&self, protocol: Protocol) -> Option<&dyn ProtocolCodec> {
        self.by_protocol.get(&protocol).map(|c| c.as_ref())
    }

    /// Returns all registered schemes, sorted.
    pub fn schemes(&self) -> Vec<&'static str> {
        let mut schemes: Vec<_> = self.by_scheme.keys().copied().collect();
        schemes.sort_unstable();
        schemes
    }

    /// Returns true if the text contains a link for any registered scheme.
    pub fn contains_link(&self, text: &str) -> bool {
        self.by_scheme
            .keys()
            .any(|scheme| text.contains(&format!("{}://", scheme)))
    }

    /// Decodes a URI, dispatching on its scheme.
    pub fn parse_url(&self, uri: &str) -> Result<Node, CodecError> {
        let uri = uri.trim();
        let (scheme, _) = uri
            .split_once("://")
            .ok_or_else(|| CodecError::format("missing scheme"))?;
        let codec = self
            .get(scheme)
            .ok_or_else(|| CodecError::unsupported("scheme", scheme))?;
        codec.parse_url(uri)
    }

    /// Encodes a node with the codec for its protocol.
    pub fn to_url(&self, node: &Node) -> Result<String, CodecError> {
        self.codec_for(node)?.to_url(node)
    }

    /// Validates a node with the codec for its protocol.
    pub fn validate(&self, node: &Node) -> Result<(), CodecError> {
        self.codec_for(node)?.validate(node)
    }

    fn codec_for(&self, node: &Node) -> Result<&dyn ProtocolCodec, CodecError> {
        self.for_protocol(node.protocol)
            .ok_or_else(|| CodecError::unsupported("type", node.protocol.as_str()))
    }
}

impl std::fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Decodes base64 in either alphabet, with or without padding.
///
/// Whitespace is removed, URL-safe characters are mapped onto the standard
/// alphabet and `=` is appended up to a multiple of four before decoding.
pub fn decode_base64(input: &str) -> Option<Vec<u8>> {
    let mut normalized: String = input
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    if normalized.is_empty() {
        return None;
    }
    while normalized.len() % 4 != 0 {
        normalized.push('=');
    }
    base64::engine::general_purpose::STANDARD
        .decode(normalized.as_bytes())
        .ok()
}

/// Decodes base64 into UTF-8 text.
pub fn decode_base64_text(input: &str) -> Option<String> {
    decode_base64(input).and_then(|bytes| String::from_utf8(bytes).ok())
}

/// Structural pieces of a `scheme://userinfo@host:port/?query#fragment` URI.
#[derive(Debug, Default)]
pub(crate) struct UriParts {
    /// Raw (still percent-encoded) userinfo.
    pub userinfo: String,
    pub host: String,
    pub port: u16,
    pub query: BTreeMap<String, String>,
    /// Decoded fragment.
    pub name: String,
}

impl UriParts {
    /// Splits a URI of the given scheme. The userinfo must be present.
    pub fn parse(uri: &str, schemes: &[&str]) -> Result<Self, CodecError> {
        let rest = strip_scheme(uri, schemes)?;
        let (rest, fragment) = split_fragment(rest);
        let (rest, query) = rest.split_once('?').unwrap_or((rest, ""));
        let (userinfo, authority) = rest
            .rsplit_once('@')
            .ok_or_else(|| CodecError::format("missing credentials"))?;
        if userinfo.is_empty() {
            return Err(CodecError::format("missing credentials"));
        }
        let authority = authority.trim_end_matches('/');
        let (host, port) = parse_host_port(authority)?;

        Ok(Self {
            userinfo: userinfo.to_string(),
            host,
            port,
            query: parse_query(query),
            name: fragment,
        })
    }

    /// Returns a query parameter if present and non-empty.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Returns the first present parameter among `keys`.
    pub fn first_param(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.param(k))
    }

    /// Interprets any of `keys` as a boolean flag (`1`, `true`).
    pub fn flag(&self, keys: &[&str]) -> bool {
        self.first_param(keys)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true"))
            .unwrap_or(false)
    }

    /// Splits a comma-separated parameter.
    pub fn list(&self, key: &str) -> Vec<String> {
        self.param(key).map(split_list).unwrap_or_default()
    }
}

/// Removes `scheme://` for any of the accepted schemes.
pub(crate) fn strip_scheme<'a>(uri: &'a str, schemes: &[&str]) -> Result<&'a str, CodecError> {
    let (scheme, rest) = uri
        .trim()
        .split_once("://")
        .ok_or_else(|| CodecError::format("missing scheme"))?;
    if schemes.iter().any(|s| s.eq_ignore_ascii_case(scheme)) {
        Ok(rest)
    } else {
        Err(CodecError::format(format!("unexpected scheme {}", scheme)))
    }
}

/// Splits off and decodes the `#fragment`.
pub(crate) fn split_fragment(s: &str) -> (&str, String) {
    match s.split_once('#') {
        Some((body, fragment)) => (body, percent_decode(fragment)),
        None => (s, String::new()),
    }
}

/// Parses `host:port` or `[v6]:port`.
pub(crate) fn parse_host_port(s: &str) -> Result<(String, u16), CodecError> {
    let (host, port) = if let Some(rest) = s.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| CodecError::format("unterminated IPv6 literal"))?;
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| CodecError::format("missing port"))?;
        (host, port)
    } else {
        s.rsplit_once(':')
            .ok_or_else(|| CodecError::format("missing port"))?
    };
    if host.is_empty() {
        return Err(CodecError::format("missing host"));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| CodecError::format(format!("invalid port {:?}", port)))?;
    Ok((host.to_string(), port))
}

/// Formats a host for use in a URI authority.
pub(crate) fn format_host(host: &str) -> String {
    if host.contains(':') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}

fn parse_query(query: &str) -> BTreeMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Percent-decodes, keeping the raw text if it is not valid UTF-8.
pub(crate) fn percent_decode(s: &str) -> String {
    urlencoding::decode(s)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

pub(crate) fn percent_encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

pub(crate) fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Builds `scheme://userinfo@host:port?query#name`.
pub(crate) fn build_uri(
    scheme: &str,
    userinfo: &str,
    node: &Node,
    query: &[(&str, String)],
) -> String {
    let mut uri = format!(
        "{}://{}@{}:{}",
        scheme,
        userinfo,
        format_host(&node.address),
        node.port
    );
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    let mut any = false;
    for (key, value) in query {
        if !value.is_empty() {
            serializer.append_pair(key, value);
            any = true;
        }
    }
    if any {
        uri.push('?');
        uri.push_str(&serializer.finish());
    }
    if !node.name.is_empty() {
        uri.push('#');
        uri.push_str(&percent_encode(&node.name));
    }
    uri
}

/// Reads transport parameters shared by VLESS and Trojan URIs.
pub(crate) fn apply_transport(node: &mut Node, parts: &UriParts) {
    node.network = match parts.param("type") {
        Some("h2") => "http".to_string(),
        Some(t) => t.to_ascii_lowercase(),
        None => String::new(),
    };
    match node.network.as_str() {
        "grpc" => {
            node.service_name = parts
                .first_param(&["serviceName", "path"])
                .unwrap_or_default()
                .to_string();
        }
        "" | "tcp" => {}
        _ => {
            node.path = parts.param("path").unwrap_or_default().to_string();
            node.host = parts.param("host").unwrap_or_default().to_string();
        }
    }
}

/// Inverse of [`apply_transport`]. An explicit `tcp` is written out so it
/// survives a round trip; an empty network is left off.
pub(crate) fn transport_query(node: &Node) -> Vec<(&'static str, String)> {
    match node.network.as_str() {
        "" => vec![],
        "tcp" => vec![("type", "tcp".to_string())],
        "grpc" => vec![
            ("type", "grpc".to_string()),
            ("serviceName", node.service_name.clone()),
        ],
        other => vec![
            ("type", other.to_string()),
            ("path", node.path.clone()),
            ("host", node.host.clone()),
        ],
    }
}

/// Checks what every protocol shares: address, port and declared type.
pub(crate) fn validate_common(node: &Node, protocol: Protocol) -> Result<(), CodecError> {
    if node.protocol != protocol {
        return Err(CodecError::unsupported("type", node.protocol.as_str()));
    }
    if node.address.trim().is_empty() {
        return Err(CodecError::format("address is empty"));
    }
    if node.port == 0 {
        return Err(CodecError::unsupported("port", "0"));
    }
    Ok(())
}

pub(crate) fn require(value: &str, field: &'static str) -> Result<(), CodecError> {
    if value.trim().is_empty() {
        Err(CodecError::format(format!("{} is empty", field)))
    } else {
        Ok(())
    }
}

pub(crate) fn validate_network(node: &Node) -> Result<(), CodecError> {
    if NETWORKS.contains(&node.transport()) {
        Ok(())
    } else {
        Err(CodecError::unsupported("network", node.network.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_base64_handles_missing_padding_and_urlsafe() {
        let padded = decode_base64_text("YWVzLTI1Ni1nY206cGFzcw==").unwrap();
        let unpadded = decode_base64_text("YWVzLTI1Ni1nY206cGFzcw").unwrap();
        assert_eq!(padded, "aes-256-gcm:pass");
        assert_eq!(unpadded, padded);
        // 0xfb 0xff encodes to "+/8" in standard and "-_8" in URL-safe
        assert_eq!(decode_base64("-_8").unwrap(), vec![0xfb, 0xff]);
        assert_eq!(decode_base64("+/8=").unwrap(), vec![0xfb, 0xff]);
        assert!(decode_base64("").is_none());
        assert!(decode_base64("not base64!").is_none());
    }

    #[test]
    fn uri_parts_split() {
        let uri = "trojan://p%40ss@[2001:db8::1]:443/?sni=a.com&alpn=h2,http/1.1#My%20Node";
        let parts = UriParts::parse(uri, &["trojan"]).unwrap();
        assert_eq!(parts.userinfo, "p%40ss");
        assert_eq!(parts.host, "2001:db8::1");
        assert_eq!(parts.port, 443);
        assert_eq!(parts.param("sni"), Some("a.com"));
        assert_eq!(parts.list("alpn"), vec!["h2", "http/1.1"]);
        assert_eq!(parts.name, "My Node");
    }

    #[test]
    fn uri_parts_rejects_missing_port() {
        let err = UriParts::parse("trojan://pass@example.com", &["trojan"]).unwrap_err();
        assert!(matches!(err, CodecError::Format(_)));
    }

    #[test]
    fn uri_parts_rejects_wrong_scheme() {
        assert!(UriParts::parse("vless://id@a.com:1", &["trojan"]).is_err());
    }

    #[test]
    fn registry_dispatches_by_scheme() {
        let registry = ProtocolRegistry::with_defaults();
        assert!(registry.get("hy2").is_some());
        assert!(registry.get("HYSTERIA2").is_some());
        assert!(registry.get("wireguard").is_none());
        assert_eq!(
            registry.for_protocol(Protocol::Tuic).unwrap().protocol(),
            Protocol::Tuic
        );

        let node = registry
            .parse_url("ss://YWVzLTI1Ni1nY206cGFzcw==@example.com:8388#My-Node")
            .unwrap();
        assert_eq!(node.protocol, Protocol::Shadowsocks);
    }

    #[test]
    fn registry_rejects_unknown_scheme() {
        let registry = ProtocolRegistry::with_defaults();
        let err = registry.parse_url("socks5://u:p@a.com:1080").unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedValue { field: "scheme", .. }));
        assert!(registry.parse_url("no scheme here").is_err());
    }

    #[test]
    fn empty_registry_has_no_codecs() {
        let registry = ProtocolRegistry::new();
        assert!(registry.schemes().is_empty());
        let node = Node::new(Protocol::Trojan, "t", "a.com", 443);
        assert!(registry.validate(&node).is_err());
    }

    #[test]
    fn contains_link_checks_registered_schemes() {
        let registry = ProtocolRegistry::with_defaults();
        assert!(registry.contains_link("foo\ntuic://x:y@a.com:1\n"));
        assert!(!registry.contains_link("proxies:\n  - name: a"));
    }
}
