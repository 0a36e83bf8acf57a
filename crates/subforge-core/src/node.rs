//! Canonical proxy endpoint descriptor.
//!
//! Every subscription format decodes into [`Node`]. The struct is flat so it
//! doubles as the JSON interchange shape between the core, storage and the
//! HTTP layer; protocol-specific fields are left empty when they do not apply.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Supported proxy protocols.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Protocol {
    /// Shadowsocks (SIP002 / legacy base64 URIs).
    #[default]
    #[serde(rename = "ss")]
    Shadowsocks,
    /// VMess (base64 JSON payload).
    #[serde(rename = "vmess")]
    Vmess,
    /// Trojan.
    #[serde(rename = "trojan")]
    Trojan,
    /// VLESS.
    #[serde(rename = "vless")]
    Vless,
    /// Hysteria 2.
    #[serde(rename = "hysteria2")]
    Hysteria2,
    /// TUIC v5.
    #[serde(rename = "tuic")]
    Tuic,
}

impl Protocol {
    /// All supported protocols, in registry order.
    pub const ALL: [Protocol; 6] = [
        Protocol::Shadowsocks,
        Protocol::Vmess,
        Protocol::Trojan,
        Protocol::Vless,
        Protocol::Hysteria2,
        Protocol::Tuic,
    ];

    /// Returns the short protocol name used in the node JSON shape.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Shadowsocks => "ss",
            Protocol::Vmess => "vmess",
            Protocol::Trojan => "trojan",
            Protocol::Vless => "vless",
            Protocol::Hysteria2 => "hysteria2",
            Protocol::Tuic => "tuic",
        }
    }

    /// Returns the outbound `type` string understood by the proxy engine.
    pub fn outbound_type(&self) -> &'static str {
        match self {
            Protocol::Shadowsocks => "shadowsocks",
            other => other.as_str(),
        }
    }

    /// Parses a protocol name. Accepts both short names and engine type names.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ss" | "shadowsocks" => Some(Protocol::Shadowsocks),
            "vmess" => Some(Protocol::Vmess),
            "trojan" => Some(Protocol::Trojan),
            "vless" => Some(Protocol::Vless),
            "hysteria2" | "hy2" => Some(Protocol::Hysteria2),
            "tuic" => Some(Protocol::Tuic),
            _ => None,
        }
    }

    /// Returns true if the protocol always runs over TLS.
    pub fn implies_tls(&self) -> bool {
        matches!(
            self,
            Protocol::Trojan | Protocol::Hysteria2 | Protocol::Tuic
        )
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proxy endpoint descriptor.
///
/// Nodes are value records: a subscription refresh replaces the whole set
/// rather than patching individual nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Node {
    /// Stable identifier derived from the endpoint (see [`Node::generate_id`]).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Protocol.
    #[serde(rename = "type")]
    pub protocol: Protocol,
    /// Server hostname or IP literal (without brackets).
    pub address: String,
    /// Server port (1-65535 for a valid node).
    pub port: u16,

    /// Shadowsocks cipher.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub method: String,
    /// Shadowsocks / Trojan / Hysteria2 / TUIC password.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    /// VMess / VLESS / TUIC user id.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    /// VMess alter id.
    #[serde(skip_serializing_if = "is_zero")]
    pub alter_id: u16,
    /// VMess cipher. Empty means `auto` (see [`Node::cipher`]).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub security: String,

    /// Transport: `tcp`, `ws`, `grpc` or `http`. Empty means `tcp`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub network: String,
    /// WebSocket / HTTP path.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    /// WebSocket / HTTP host header.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host: String,
    /// gRPC service name.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service_name: String,

    /// TLS enabled.
    pub tls: bool,
    /// TLS server name. Empty means the address (see [`Node::server_name`]).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sni: String,
    /// ALPN protocol list.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alpn: Vec<String>,
    /// Skip certificate verification.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub insecure: bool,
    /// uTLS client fingerprint.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub fingerprint: String,
    /// REALITY public key (VLESS).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reality_public_key: String,
    /// REALITY short id (VLESS).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reality_short_id: String,

    /// VLESS flow.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub flow: String,
    /// TUIC congestion control. Empty means `cubic`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub congestion_control: String,
    /// Hysteria2 upload bandwidth, e.g. `100 Mbps`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub up: String,
    /// Hysteria2 download bandwidth.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub down: String,
    /// Hysteria2 obfuscation type (`salamander`).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub obfs: String,
    /// Hysteria2 obfuscation password.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub obfs_password: String,
}

fn is_zero(v: &u16) -> bool {
    *v == 0
}

impl Node {
    /// Creates a node with the common fields set and everything else empty.
    pub fn new(
        protocol: Protocol,
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            protocol,
            address: address.into(),
            port,
            tls: protocol.implies_tls(),
            ..Default::default()
        }
    }

    /// Computes the deterministic identifier for this endpoint.
    ///
    /// The digest covers protocol, address, port, credential and name so an
    /// unchanged endpoint keeps its id across subscription refreshes.
    pub fn generate_id(&self) -> String {
        let port = self.port.to_string();
        let mut hasher = Sha256::new();
        for part in [
            self.protocol.as_str(),
            self.address.as_str(),
            port.as_str(),
            self.credential(),
            self.name.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        let digest = hasher.finalize();
        digest[..6].iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Returns the node with its id recomputed.
    pub fn with_generated_id(mut self) -> Self {
        self.id = self.generate_id();
        self
    }

    /// The secret that identifies the user on this endpoint.
    pub fn credential(&self) -> &str {
        match self.protocol {
            Protocol::Shadowsocks | Protocol::Trojan | Protocol::Hysteria2 => &self.password,
            Protocol::Vmess | Protocol::Vless | Protocol::Tuic => &self.uuid,
        }
    }

    /// Returns the effective transport, treating an empty value as `tcp`.
    pub fn transport(&self) -> &str {
        if self.network.is_empty() {
            "tcp"
        } else {
            &self.network
        }
    }

    /// Returns the VMess cipher, treating an empty value as `auto`.
    pub fn cipher(&self) -> &str {
        if self.security.is_empty() {
            "auto"
        } else {
            &self.security
        }
    }

    /// Returns the TUIC congestion control, treating an empty value as `cubic`.
    pub fn congestion(&self) -> &str {
        if self.congestion_control.is_empty() {
            "cubic"
        } else {
            &self.congestion_control
        }
    }

    /// Returns the TLS server name, falling back to the address.
    pub fn server_name(&self) -> &str {
        if self.sni.is_empty() {
            &self.address
        } else {
            &self.sni
        }
    }

    /// Returns `host:port`, bracketing IPv6 literals.
    pub fn endpoint(&self) -> String {
        if self.address.contains(':') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}
