//! VLESS URIs: `vless://uuid@host:port?security=tls|reality&flow=..&type=..#name`.

use super::{
    apply_transport, build_uri, percent_decode, percent_encode, require, transport_query,
    validate_common, validate_network, CodecError, ProtocolCodec, UriParts,
};
use crate::node::{Node, Protocol};

/// Flow values accepted on VLESS nodes. Empty means no flow control.
pub const VLESS_FLOWS: &[&str] = &["", "xtls-rprx-vision"];

/// VLESS codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct VlessCodec;

impl ProtocolCodec for VlessCodec {
    fn protocol(&self) -> Protocol {
        Protocol::Vless
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["vless"]
    }

    fn parse_url(&self, uri: &str) -> Result<Node, CodecError> {
        let parts = UriParts::parse(uri, self.schemes())?;
        let mut node = Node::new(
            Protocol::Vless,
            parts.name.clone(),
            parts.host.clone(),
            parts.port,
        );
        node.uuid = percent_decode(&parts.userinfo);
        node.flow = parts.param("flow").unwrap_or_default().to_string();

        let security = parts.param("security").unwrap_or("none").to_ascii_lowercase();
        node.tls = matches!(security.as_str(), "tls" | "reality" | "xtls");
        node.sni = parts
            .first_param(&["sni", "peer"])
            .unwrap_or_default()
            .to_string();
        node.alpn = parts.list("alpn");
        node.insecure = parts.flag(&["allowInsecure", "insecure", "allow_insecure"]);
        node.fingerprint = parts.param("fp").unwrap_or_default().to_string();
        if security == "reality" {
            node.reality_public_key = parts.param("pbk").unwrap_or_default().to_string();
            node.reality_short_id = parts.param("sid").unwrap_or_default().to_string();
            if node.reality_public_key.is_empty() {
                return Err(CodecError::format("reality requires pbk"));
            }
        }
        apply_transport(&mut node, &parts);

        self.validate(&node)?;
        Ok(node.with_generated_id())
    }

    fn to_url(&self, node: &Node) -> Result<String, CodecError> {
        self.validate(node)?;
        let security = if !node.tls {
            "none"
        } else if !node.reality_public_key.is_empty() {
            "reality"
        } else {
            "tls"
        };
        let mut query = vec![
            ("encryption", "none".to_string()),
            ("security", security.to_string()),
            ("flow", node.flow.clone()),
            ("sni", node.sni.clone()),
            ("alpn", node.alpn.join(",")),
            ("fp", node.fingerprint.clone()),
            ("pbk", node.reality_public_key.clone()),
            ("sid", node.reality_short_id.clone()),
        ];
        if node.insecure {
            query.push(("allowInsecure", "1".to_string()));
        }
        query.extend(transport_query(node));
        Ok(build_uri("vless", &percent_encode(&node.uuid), node, &query))
    }

    fn validate(&self, node: &Node) -> Result<(), CodecError> {
        validate_common(node, Protocol::Vless)?;
        require(&node.uuid, "uuid")?;
        validate_network(node)?;
        if !VLESS_FLOWS.contains(&node.flow.as_str()) {
            return Err(CodecError::unsupported("flow", node.flow.clone()));
        }
        if !node.tls && !node.reality_public_key.is_empty() {
            return Err(CodecError::format("reality requires tls"));
        }
        if !node.reality_short_id.is_empty() && node.reality_public_key.is_empty() {
            return Err(CodecError::format("reality requires pbk"));
        }
        Ok(())
    }
}
