//! Hysteria2 URIs: `hysteria2://auth@host:port/?sni=..&obfs=salamander&up=..&down=..#name`.
//!
//! `hy2://` is accepted as an alias. TLS is always on.

use super::{
    build_uri, percent_decode, percent_encode, require, validate_common, CodecError,
    ProtocolCodec, UriParts,
};
use crate::node::{Node, Protocol};

/// Hysteria2 codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hysteria2Codec;

impl ProtocolCodec for Hysteria2Codec {
    fn protocol(&self) -> Protocol {
        Protocol::Hysteria2
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["hysteria2", "hy2"]
    }

    fn parse_url(&self, uri: &str) -> Result<Node, CodecError> {
        let parts = UriParts::parse(uri, self.schemes())?;
        let mut node = Node::new(
            Protocol::Hysteria2,
            parts.name.clone(),
            parts.host.clone(),
            parts.port,
        );
        // `user:pass` auth strings are kept whole.
        node.password = percent_decode(&parts.userinfo);
        node.sni = parts
            .first_param(&["sni", "peer"])
            .unwrap_or_default()
            .to_string();
        node.insecure = parts.flag(&["insecure", "allowInsecure", "allow_insecure"]);
        node.alpn = parts.list("alpn");
        node.up = parts
            .first_param(&["up", "upmbps"])
            .unwrap_or_default()
            .to_string();
        node.down = parts
            .first_param(&["down", "downmbps"])
            .unwrap_or_default()
            .to_string();
        node.obfs = parts.param("obfs").unwrap_or_default().to_string();
        node.obfs_password = parts.param("obfs-password").unwrap_or_default().to_string();

        self.validate(&node)?;
        Ok(node.with_generated_id())
    }

    fn to_url(&self, node: &Node) -> Result<String, CodecError> {
        self.validate(node)?;
        let mut query = vec![
            ("sni", node.sni.clone()),
            ("alpn", node.alpn.join(",")),
            ("obfs", node.obfs.clone()),
            ("obfs-password", node.obfs_password.clone()),
            ("up", node.up.clone()),
            ("down", node.down.clone()),
        ];
        if node.insecure {
            query.push(("insecure", "1".to_string()));
        }
        Ok(build_uri("hysteria2", &percent_encode(&node.password), node, &query))
    }

    fn validate(&self, node: &Node) -> Result<(), CodecError> {
        validate_common(node, Protocol::Hysteria2)?;
        require(&node.password, "password")?;
        if !node.obfs.is_empty() && node.obfs != "salamander" {
            return Err(CodecError::unsupported("obfs", node.obfs.clone()));
        }
        if node.obfs == "salamander" {
            require(&node.obfs_password, "obfs-password")?;
        }
        Ok(())
    }
}
