//! Trojan URIs: `trojan://password@host:port?sni=..&type=ws&path=..#name`.

use super::{
    apply_transport, build_uri, percent_decode, percent_encode, require, transport_query,
    validate_common, validate_network, CodecError, ProtocolCodec, UriParts,
};
use crate::node::{Node, Protocol};

/// Trojan codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrojanCodec;

impl ProtocolCodec for TrojanCodec {
    fn protocol(&self) -> Protocol {
        Protocol::Trojan
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["trojan"]
    }

    fn parse_url(&self, uri: &str) -> Result<Node, CodecError> {
        let parts = UriParts::parse(uri, self.schemes())?;
        let mut node = Node::new(
            Protocol::Trojan,
            parts.name.clone(),
            parts.host.clone(),
            parts.port,
        );
        node.password = percent_decode(&parts.userinfo);
        node.sni = parts
            .first_param(&["sni", "peer"])
            .unwrap_or_default()
            .to_string();
        node.alpn = parts.list("alpn");
        node.insecure = parts.flag(&["allowInsecure", "insecure", "allow_insecure"]);
        node.fingerprint = parts.param("fp").unwrap_or_default().to_string();
        apply_transport(&mut node, &parts);

        self.validate(&node)?;
        Ok(node.with_generated_id())
    }

    fn to_url(&self, node: &Node) -> Result<String, CodecError> {
        self.validate(node)?;
        let mut query = vec![("sni", node.sni.clone())];
        query.extend(transport_query(node));
        query.push(("alpn", node.alpn.join(",")));
        query.push(("fp", node.fingerprint.clone()));
        if node.insecure {
            query.push(("allowInsecure", "1".to_string()));
        }
        Ok(build_uri("trojan", &percent_encode(&node.password), node, &query))
    }

    fn validate(&self, node: &Node) -> Result<(), CodecError> {
        validate_common(node, Protocol::Trojan)?;
        require(&node.password, "password")?;
        validate_network(node)
    }
}
