//! Clash / Mihomo YAML subscriptions.
//!
//! Only the `proxies` list is read (`Proxy` in older exports). Each entry is
//! deserialized on its own so one malformed proxy does not sink the file.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::{debug, warn};

use super::{OneOrMany, Result, Scalar};
use crate::node::{Node, Protocol};
use crate::protocol::ProtocolRegistry;

#[derive(Debug, Deserialize)]
struct ClashDoc {
    #[serde(default)]
    proxies: Vec<serde_yaml::Value>,
    #[serde(default, rename = "Proxy")]
    legacy_proxies: Vec<serde_yaml::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct ClashProxy {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    server: String,
    port: Option<Scalar>,

    cipher: String,
    password: String,
    uuid: String,
    #[serde(rename = "alterId")]
    alter_id: Option<Scalar>,
    flow: String,

    network: String,
    tls: bool,
    servername: String,
    sni: String,
    skip_cert_verify: bool,
    alpn: Option<OneOrMany>,
    client_fingerprint: String,
    reality_opts: Option<RealityOpts>,

    ws_opts: Option<WsOpts>,
    grpc_opts: Option<GrpcOpts>,
    h2_opts: Option<H2Opts>,

    up: Option<Scalar>,
    down: Option<Scalar>,
    obfs: String,
    obfs_password: String,
    congestion_controller: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct RealityOpts {
    public_key: String,
    short_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WsOpts {
    path: String,
    headers: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct GrpcOpts {
    grpc_service_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct H2Opts {
    path: String,
    host: Option<OneOrMany>,
}

impl ClashProxy {
    fn into_node(self) -> Option<Node> {
        let protocol = Protocol::parse(&self.kind)?;
        let port = self.port.as_ref().and_then(Scalar::as_port).unwrap_or(0);
        let mut node = Node::new(protocol, self.name, self.server, port);
        let sni = if self.sni.is_empty() { self.servername } else { self.sni };

        match protocol {
            Protocol::Shadowsocks => {
                node.method = self.cipher;
                node.password = self.password;
            }
            Protocol::Vmess => {
                node.uuid = self.uuid;
                node.alter_id = self
                    .alter_id
                    .as_ref()
                    .and_then(Scalar::as_u64)
                    .and_then(|n| u16::try_from(n).ok())
                    .unwrap_or(0);
                node.security = self.cipher;
                node.tls = self.tls;
            }
            Protocol::Trojan => node.password = self.password,
            Protocol::Vless => {
                node.uuid = self.uuid;
                node.flow = self.flow;
                node.tls = self.tls || self.reality_opts.is_some();
                if let Some(reality) = self.reality_opts {
                    node.reality_public_key = reality.public_key;
                    node.reality_short_id = reality.short_id;
                }
            }
            Protocol::Hysteria2 => {
                node.password = self.password;
                node.obfs = self.obfs;
                node.obfs_password = self.obfs_password;
                node.up = self.up.as_ref().map(Scalar::as_bandwidth).unwrap_or_default();
                node.down = self.down.as_ref().map(Scalar::as_bandwidth).unwrap_or_default();
            }
            Protocol::Tuic => {
                node.uuid = self.uuid;
                node.password = self.password;
                node.congestion_control = self.congestion_controller;
            }
        }

        if matches!(protocol, Protocol::Vmess | Protocol::Trojan | Protocol::Vless) {
            node.network = match self.network.as_str() {
                "h2" => "http".to_string(),
                other => other.to_string(),
            };
            match node.network.as_str() {
                "ws" => {
                    if let Some(ws) = self.ws_opts {
                        node.path = ws.path;
                        node.host = ws
                            .headers
                            .iter()
                            .find(|(k, _)| k.eq_ignore_ascii_case("host"))
                            .map(|(_, v)| v.clone())
                            .unwrap_or_default();
                    }
                }
                "grpc" => {
                    if let Some(grpc) = self.grpc_opts {
                        node.service_name = grpc.grpc_service_name;
                    }
                }
                "http" => {
                    if let Some(h2) = self.h2_opts {
                        node.path = h2.path;
                        node.host = h2.host.map(|h| h.first()).unwrap_or_default();
                    }
                }
                _ => {}
            }
        }

        if node.tls {
            node.sni = sni;
            node.insecure = self.skip_cert_verify;
            node.alpn = self.alpn.map(OneOrMany::into_vec).unwrap_or_default();
            node.fingerprint = self.client_fingerprint;
        }
        Some(node)
    }
}

/// Parses the proxy list of a Clash document.
pub(super) fn parse(content: &str, registry: &ProtocolRegistry) -> Result<Vec<Node>> {
    let doc: ClashDoc = serde_yaml::from_str(content)?;
    let entries = doc.proxies.into_iter().chain(doc.legacy_proxies);

    let mut nodes = Vec::new();
    for (index, entry) in entries.enumerate() {
        let proxy: ClashProxy = match serde_yaml::from_value(entry) {
            Ok(p) => p,
            Err(e) => {
                warn!(index, error = %e, "skipping malformed clash proxy");
                continue;
            }
        };
        let name = proxy.name.clone();
        let kind = proxy.kind.clone();
        let Some(node) = proxy.into_node() else {
            debug!(name = %name, kind = %kind, "skipping unsupported clash proxy type");
            continue;
        };
        match registry.validate(&node) {
            Ok(()) => nodes.push(node.with_generated_id()),
            Err(e) => warn!(name = %name, error = %e, "skipping invalid clash proxy"),
        }
    }
    Ok(nodes)
}
