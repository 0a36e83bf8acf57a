//! VMess URIs: `vmess://base64(json)`.
//!
//! The JSON payload follows the v2rayN share format:
//! `{v, ps, add, port, id, aid, scy, net, type, host, path, tls, sni, alpn, fp}`.
//! `port` and `aid` appear as both numbers and strings in the wild.

use base64::Engine;
use serde_json::{json, Value};

use super::{
    decode_base64_text, require, split_list, strip_scheme, validate_common, validate_network,
    CodecError, ProtocolCodec,
};
use crate::node::{Node, Protocol};

/// Ciphers accepted in the `scy` field.
pub const VMESS_SECURITIES: &[&str] = &["auto", "aes-128-gcm", "chacha20-poly1305", "none", "zero"];

/// VMess codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct VmessCodec;

fn str_field(obj: &Value, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn num_field(obj: &Value, key: &str) -> Result<Option<u64>, CodecError> {
    match obj.get(key) {
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| CodecError::format(format!("{} is not a positive integer", key))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| CodecError::format(format!("{} is not a number: {:?}", key, s))),
        Some(Value::Null) | None => Ok(None),
        Some(other) => Err(CodecError::format(format!("{} has unexpected type: {}", key, other))),
    }
}

impl ProtocolCodec for VmessCodec {
    fn protocol(&self) -> Protocol {
        Protocol::Vmess
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["vmess"]
    }

    fn parse_url(&self, uri: &str) -> Result<Node, CodecError> {
        let payload = strip_scheme(uri, self.schemes())?;
        // Some exporters append a fragment after the base64 blob.
        let payload = payload.split('#').next().unwrap_or(payload);
        let text = decode_base64_text(payload)
            .ok_or_else(|| CodecError::format("payload is not base64"))?;
        let obj: Value = serde_json::from_str(&text)
            .map_err(|e| CodecError::format(format!("payload is not JSON: {}", e)))?;
        if !obj.is_object() {
            return Err(CodecError::format("payload is not a JSON object"));
        }

        let port = num_field(&obj, "port")?.ok_or_else(|| CodecError::format("missing port"))?;
        let port =
            u16::try_from(port).map_err(|_| CodecError::unsupported("port", port.to_string()))?;
        let alter_id = num_field(&obj, "aid")?.unwrap_or(0);

        let mut node = Node::new(
            Protocol::Vmess,
            str_field(&obj, "ps"),
            str_field(&obj, "add"),
            port,
        );
        node.uuid = str_field(&obj, "id");
        node.alter_id = u16::try_from(alter_id)
            .map_err(|_| CodecError::unsupported("alter_id", alter_id.to_string()))?;
        node.security = str_field(&obj, "scy").to_ascii_lowercase();
        node.network = match str_field(&obj, "net").to_ascii_lowercase().as_str() {
            "h2" => "http".to_string(),
            other => other.to_string(),
        };
        match node.network.as_str() {
            "grpc" => node.service_name = str_field(&obj, "path"),
            "" | "tcp" => {}
            _ => {
                node.path = str_field(&obj, "path");
                node.host = str_field(&obj, "host");
            }
        }
        node.tls = str_field(&obj, "tls").eq_ignore_ascii_case("tls");
        node.sni = str_field(&obj, "sni");
        node.alpn = split_list(&str_field(&obj, "alpn"));
        node.fingerprint = str_field(&obj, "fp");
        node.insecure = matches!(str_field(&obj, "allowInsecure").as_str(), "1" | "true");

        self.validate(&node)?;
        Ok(node.with_generated_id())
    }

    fn to_url(&self, node: &Node) -> Result<String, CodecError> {
        self.validate(node)?;
        let path = if node.transport() == "grpc" {
            &node.service_name
        } else {
            &node.path
        };
        let tls = if node.tls { "tls" } else { "" };
        let mut obj = json!({
            "v": "2",
            "ps": node.name,
            "add": node.address,
            "port": node.port.to_string(),
            "id": node.uuid,
            "aid": node.alter_id.to_string(),
            "scy": node.security,
            "net": node.network,
            "type": "none",
            "host": node.host,
            "path": path,
            "tls": tls,
            "sni": node.sni,
            "alpn": node.alpn.join(","),
            "fp": node.fingerprint,
        });
        if node.insecure {
            obj["allowInsecure"] = json!("1");
        }
        let text = serde_json::to_string(&obj).map_err(|e| CodecError::format(e.to_string()))?;
        Ok(format!(
            "vmess://{}",
            base64::engine::general_purpose::STANDARD.encode(text)
        ))
    }

    fn validate(&self, node: &Node) -> Result<(), CodecError> {
        validate_common(node, Protocol::Vmess)?;
        require(&node.uuid, "uuid")?;
        validate_network(node)?;
        if !node.security.is_empty() && !VMESS_SECURITIES.contains(&node.security.as_str()) {
            return Err(CodecError::unsupported("security", node.security.clone()));
        }
        Ok(())
    }
}
