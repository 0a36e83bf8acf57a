//! sing-box JSON subscriptions: proxy entries of the `outbounds` list.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::{debug, warn};

use super::{OneOrMany, Result, Scalar};
use crate::node::{Node, Protocol};
use crate::protocol::ProtocolRegistry;

#[derive(Debug, Deserialize)]
struct SingboxDoc {
    #[serde(default)]
    outbounds: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SingboxOutbound {
    #[serde(rename = "type")]
    kind: String,
    tag: String,
    server: String,
    server_port: Option<Scalar>,
    method: String,
    password: String,
    uuid: String,
    alter_id: u16,
    security: String,
    flow: String,
    congestion_control: String,
    up_mbps: Option<Scalar>,
    down_mbps: Option<Scalar>,
    obfs: Option<SingboxObfs>,
    tls: Option<SingboxTls>,
    transport: Option<SingboxTransport>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SingboxObfs {
    #[serde(rename = "type")]
    kind: String,
    password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SingboxTls {
    enabled: bool,
    server_name: String,
    insecure: bool,
    alpn: Option<OneOrMany>,
    utls: Option<SingboxUtls>,
    reality: Option<SingboxReality>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SingboxUtls {
    enabled: bool,
    fingerprint: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SingboxReality {
    enabled: bool,
    public_key: String,
    short_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SingboxTransport {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    headers: BTreeMap<String, OneOrMany>,
    host: Option<OneOrMany>,
    service_name: String,
}

impl SingboxOutbound {
    fn into_node(self) -> Option<Node> {
        let protocol = Protocol::parse(&self.kind)?;
        let port = self.server_port.as_ref().and_then(Scalar::as_port).unwrap_or(0);
        let mut node = Node::new(protocol, self.tag, self.server, port);

        node.method = self.method;
        node.password = self.password;
        node.uuid = self.uuid;
        node.flow = self.flow;
        match protocol {
            Protocol::Vmess => {
                node.alter_id = self.alter_id;
                node.security = self.security;
            }
            Protocol::Hysteria2 => {
                node.up = self.up_mbps.as_ref().map(Scalar::as_bandwidth).unwrap_or_default();
                node.down = self.down_mbps.as_ref().map(Scalar::as_bandwidth).unwrap_or_default();
                if let Some(obfs) = self.obfs {
                    node.obfs = obfs.kind;
                    node.obfs_password = obfs.password;
                }
            }
            Protocol::Tuic => {
                node.congestion_control = self.congestion_control;
            }
            _ => {}
        }

        if matches!(protocol, Protocol::Vmess | Protocol::Trojan | Protocol::Vless) {
            if let Some(transport) = self.transport {
                node.network = transport.kind;
                match node.network.as_str() {
                    "grpc" => node.service_name = transport.service_name,
                    _ => {
                        node.path = transport.path;
                        node.host = transport
                            .headers
                            .iter()
                            .find(|(k, _)| k.eq_ignore_ascii_case("host"))
                            .map(|(_, v)| v.first())
                            .or_else(|| transport.host.as_ref().map(OneOrMany::first))
                            .unwrap_or_default();
                    }
                }
            }
        }

        if let Some(tls) = self.tls {
            node.tls = protocol.implies_tls() || tls.enabled;
            if node.tls {
                node.sni = tls.server_name;
                node.insecure = tls.insecure;
                node.alpn = tls.alpn.map(OneOrMany::into_vec).unwrap_or_default();
                if let Some(utls) = tls.utls.filter(|u| u.enabled) {
                    node.fingerprint = utls.fingerprint;
                }
                if let Some(reality) = tls.reality.filter(|r| r.enabled) {
                    node.reality_public_key = reality.public_key;
                    node.reality_short_id = reality.short_id;
                }
            }
        }
        Some(node)
    }
}

/// Parses the proxy outbounds of a sing-box document.
pub(super) fn parse(content: &str, registry: &ProtocolRegistry) -> Result<Vec<Node>> {
    let doc: SingboxDoc = serde_json::from_str(content)?;

    let mut nodes = Vec::new();
    for (index, entry) in doc.outbounds.into_iter().enumerate() {
        let outbound: SingboxOutbound = match serde_json::from_value(entry) {
            Ok(o) => o,
            Err(e) => {
                warn!(index, error = %e, "skipping malformed sing-box outbound");
                continue;
            }
        };
        let tag = outbound.tag.clone();
        let kind = outbound.kind.clone();
        let Some(node) = outbound.into_node() else {
            debug!(tag = %tag, kind = %kind, "skipping non-proxy sing-box outbound");
            continue;
        };
        match registry.validate(&node) {
            Ok(()) => nodes.push(node.with_generated_id()),
            Err(e) => warn!(tag = %tag, error = %e, "skipping invalid sing-box outbound"),
        }
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::IngestError;

    const SINGBOX: &str = r#"{
      "outbounds": [
        {"type": "selector", "tag": "proxy", "outbounds": ["hk"]},
        {"type": "shadowsocks", "tag": "hk", "server": "hk.example.com", "server_port": 8388,
         "method": "2022-blake3-aes-128-gcm", "password": "c2VjcmV0c2VjcmV0c2VjcmV0"},
        {"type": "vless", "tag": "sg", "server": "sg.example.com", "server_port": 443,
         "uuid": "b831381d-6324-4d53-ad4f-8cda48b30811", "flow": "xtls-rprx-vision",
         "tls": {"enabled": true, "server_name": "www.microsoft.com",
                 "utls": {"enabled": true, "fingerprint": "chrome"},
                 "reality": {"enabled": true, "public_key": "Ptc3h5Lw", "short_id": "6ba85179"}}},
        {"type": "vmess", "tag": "us", "server": "us.example.com", "server_port": 443,
         "uuid": "b831381d-6324-4d53-ad4f-8cda48b30811", "security": "auto",
         "tls": {"enabled": true},
         "transport": {"type": "ws", "path": "/ray", "headers": {"Host": "cdn.example.com"}}},
        {"type": "hysteria2", "tag": "hy", "server": "hy.example.com", "server_port": 443,
         "password": "pw", "up_mbps": 50, "down_mbps": 200,
         "obfs": {"type": "salamander", "password": "o"}},
        {"type": "trojan", "tag": "broken", "server": "t.example.com", "server_port": 443},
        {"type": "direct", "tag": "direct"}
      ]
    }"#;

    #[test]
    fn maps_proxy_outbounds() {
        let registry = ProtocolRegistry::with_defaults();
        let nodes = parse(SINGBOX, &registry).unwrap();
        assert_eq!(nodes.len(), 4);

        assert_eq!(nodes[0].protocol, Protocol::Shadowsocks);
        assert_eq!(nodes[0].name, "hk");

        let vless = &nodes[1];
        assert!(vless.tls);
        assert_eq!(vless.sni, "www.microsoft.com");
        assert_eq!(vless.fingerprint, "chrome");
        assert_eq!(vless.reality_short_id, "6ba85179");
        assert_eq!(vless.transport(), "tcp");

        let vmess = &nodes[2];
        assert_eq!(vmess.network, "ws");
        assert_eq!(vmess.host, "cdn.example.com");
        assert!(vmess.sni.is_empty());
        assert_eq!(vmess.server_name(), "us.example.com");

        let hy2 = &nodes[3];
        assert_eq!(hy2.up, "50 Mbps");
        assert_eq!(hy2.down, "200 Mbps");
        assert_eq!(hy2.obfs_password, "o");
        assert_eq!(hy2.server_name(), "hy.example.com");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let registry = ProtocolRegistry::with_defaults();
        let err = parse("{\"outbounds\": [", &registry).unwrap_err();
        assert!(matches!(err, IngestError::Json(_)));
    }
}
