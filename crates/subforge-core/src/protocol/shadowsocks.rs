//! Shadowsocks URIs.
//!
//! Accepted forms:
//! - `ss://base64(method:password)@host:port#name` (SIP002)
//! - `ss://method:password@host:port#name` (plain userinfo)
//! - `ss://base64(method:password@host:port)#name` (legacy)

use base64::Engine;

use super::{
    decode_base64_text, format_host, parse_host_port, percent_decode, percent_encode, require,
    split_fragment, strip_scheme, validate_common, CodecError, ProtocolCodec,
};
use crate::node::{Node, Protocol};

/// Ciphers the proxy engine accepts.
pub const SHADOWSOCKS_METHODS: &[&str] = &[
    "aes-128-gcm",
    "aes-192-gcm",
    "aes-256-gcm",
    "chacha20-ietf-poly1305",
    "xchacha20-ietf-poly1305",
    "2022-blake3-aes-128-gcm",
    "2022-blake3-aes-256-gcm",
    "2022-blake3-chacha20-poly1305",
];

/// Shadowsocks codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShadowsocksCodec;

impl ShadowsocksCodec {
    fn split_credentials(userinfo: &str) -> Result<(String, String), CodecError> {
        let decoded = if userinfo.contains(':') || userinfo.contains("%3A") {
            percent_decode(userinfo)
        } else {
            decode_base64_text(&percent_decode(userinfo))
                .ok_or_else(|| CodecError::format("userinfo is neither plain nor base64"))?
        };
        let (method, password) = decoded
            .split_once(':')
            .ok_or_else(|| CodecError::format("userinfo must be method:password"))?;
        Ok((method.trim().to_ascii_lowercase(), password.to_string()))
    }
}

impl ProtocolCodec for ShadowsocksCodec {
    fn protocol(&self) -> Protocol {
        Protocol::Shadowsocks
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["ss"]
    }

    fn parse_url(&self, uri: &str) -> Result<Node, CodecError> {
        let rest = strip_scheme(uri, self.schemes())?;
        let (rest, name) = split_fragment(rest);
        // Plugin options live in the query; they are not carried on the node.
        let rest = rest.split_once('?').map(|(body, _)| body).unwrap_or(rest);
        let rest = rest.trim_end_matches('/');

        let (userinfo, authority) = match rest.rsplit_once('@') {
            Some((userinfo, authority)) => (userinfo.to_string(), authority.to_string()),
            None => {
                let decoded = decode_base64_text(rest)
                    .ok_or_else(|| CodecError::format("legacy payload is not base64"))?;
                let (userinfo, authority) = decoded
                    .rsplit_once('@')
                    .ok_or_else(|| CodecError::format("missing server address"))?;
                (userinfo.to_string(), authority.to_string())
            }
        };

        let (method, password) = if userinfo.contains(':') && !rest.contains('@') {
            // Legacy payloads carry the credentials unencoded.
            let (m, p) = userinfo
                .split_once(':')
                .ok_or_else(|| CodecError::format("userinfo must be method:password"))?;
            (m.trim().to_ascii_lowercase(), p.to_string())
        } else {
            Self::split_credentials(&userinfo)?
        };
        let (address, port) = parse_host_port(authority.trim_end_matches('/'))?;

        let mut node = Node::new(Protocol::Shadowsocks, name, address, port);
        node.method = method;
        node.password = password;
        self.validate(&node)?;
        Ok(node.with_generated_id())
    }

    fn to_url(&self, node: &Node) -> Result<String, CodecError> {
        self.validate(node)?;
        let userinfo = if node.method.starts_with("2022-") {
            // SIP022 keys must stay readable, so no base64 here.
            format!(
                "{}:{}",
                percent_encode(&node.method),
                percent_encode(&node.password)
            )
        } else {
            base64::engine::general_purpose::URL_SAFE_NO_PAD
                .encode(format!("{}:{}", node.method, node.password))
        };
        let mut uri = format!(
            "ss://{}@{}:{}",
            userinfo,
            format_host(&node.address),
            node.port
        );
        if !node.name.is_empty() {
            uri.push('#');
            uri.push_str(&percent_encode(&node.name));
        }
        Ok(uri)
    }

    fn validate(&self, node: &Node) -> Result<(), CodecError> {
        validate_common(node, Protocol::Shadowsocks)?;
        require(&node.method, "method")?;
        require(&node.password, "password")?;
        if !SHADOWSOCKS_METHODS.contains(&node.method.as_str()) {
            return Err(CodecError::unsupported("method", node.method.clone()));
        }
        Ok(())
    }
}
