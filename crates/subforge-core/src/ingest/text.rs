//! Newline-delimited share-link subscriptions.

use tracing::{debug, warn};

use super::MAX_DECODE_PASSES;
use crate::node::Node;
use crate::protocol::{decode_base64_text, ProtocolRegistry};

/// Peels up to two base64 layers until the body holds a known share link.
fn unwrap_body(content: &str, registry: &ProtocolRegistry) -> String {
    let mut text = content.to_string();
    for pass in 0..MAX_DECODE_PASSES {
        if registry.contains_link(&text) {
            break;
        }
        match decode_base64_text(&text) {
            Some(decoded) => {
                debug!(pass = pass + 1, "decoded base64 subscription layer");
                text = decoded;
            }
            None => break,
        }
    }
    text
}

/// Parses every link line. Lines that fail to decode are skipped.
pub(super) fn parse(content: &str, registry: &ProtocolRegistry) -> Vec<Node> {
    let text = unwrap_body(content, registry);
    let mut nodes = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match registry.parse_url(line) {
            Ok(node) => nodes.push(node),
            Err(e) => {
                let scheme = line.split("://").next().unwrap_or_default();
                warn!(line = index + 1, scheme, error = %e, "skipping subscription line");
            }
        }
    }
    nodes
}
