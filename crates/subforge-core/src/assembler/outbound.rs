//! Outbound section: sinks, per-node outbounds, group selectors, latency
//! groups and the category selectors, in that order.

use std::collections::HashSet;

use serde::Serialize;

use crate::group::{GroupMode, MatchedGroup};
use crate::node::{Node, Protocol};
use crate::rule_set::{
    Preference, NODE_SELECT, OUTBOUND_BLOCK, OUTBOUND_DIRECT, OUTBOUND_DNS, RULE_GROUPS,
};

/// Probe target of latency groups.
pub const URLTEST_URL: &str = "https://www.gstatic.com/generate_204";
/// Probe interval of latency groups.
pub const URLTEST_INTERVAL: &str = "3m";
/// Latency difference (ms) below which a latency group keeps its pick.
pub const URLTEST_TOLERANCE: u32 = 50;
/// Appended to a group name to tag its latency group.
pub const AUTO_SUFFIX: &str = "自动";

/// One entry of the `outbounds` array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Outbound {
    Direct {
        tag: String,
    },
    Block {
        tag: String,
    },
    Dns {
        tag: String,
    },
    Selector {
        tag: String,
        outbounds: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },
    Urltest {
        tag: String,
        outbounds: Vec<String>,
        url: String,
        interval: String,
        tolerance: u32,
    },
    Shadowsocks(ProxyOutbound),
    Vmess(ProxyOutbound),
    Trojan(ProxyOutbound),
    Vless(ProxyOutbound),
    Hysteria2(ProxyOutbound),
    Tuic(ProxyOutbound),
}

impl Outbound {
    /// Returns the tag.
    pub fn tag(&self) -> &str {
        match self {
            Outbound::Direct { tag }
            | Outbound::Block { tag }
            | Outbound::Dns { tag }
            | Outbound::Selector { tag, .. }
            | Outbound::Urltest { tag, .. } => tag,
            Outbound::Shadowsocks(p)
            | Outbound::Vmess(p)
            | Outbound::Trojan(p)
            | Outbound::Vless(p)
            | Outbound::Hysteria2(p)
            | Outbound::Tuic(p) => &p.tag,
        }
    }

    /// Returns the tags this outbound refers to.
    pub fn references(&self) -> &[String] {
        match self {
            Outbound::Selector { outbounds, .. } | Outbound::Urltest { outbounds, .. } => outbounds,
            _ => &[],
        }
    }

    /// Returns the `type` string.
    pub fn kind(&self) -> &'static str {
        match self {
            Outbound::Direct { .. } => "direct",
            Outbound::Block { .. } => "block",
            Outbound::Dns { .. } => "dns",
            Outbound::Selector { .. } => "selector",
            Outbound::Urltest { .. } => "urltest",
            Outbound::Shadowsocks(_) => Protocol::Shadowsocks.outbound_type(),
            Outbound::Vmess(_) => Protocol::Vmess.outbound_type(),
            Outbound::Trojan(_) => Protocol::Trojan.outbound_type(),
            Outbound::Vless(_) => Protocol::Vless.outbound_type(),
            Outbound::Hysteria2(_) => Protocol::Hysteria2.outbound_type(),
            Outbound::Tuic(_) => Protocol::Tuic.outbound_type(),
        }
    }

    /// Returns true for per-node outbounds.
    pub fn is_proxy(&self) -> bool {
        matches!(
            self,
            Outbound::Shadowsocks(_)
                | Outbound::Vmess(_)
                | Outbound::Trojan(_)
                | Outbound::Vless(_)
                | Outbound::Hysteria2(_)
                | Outbound::Tuic(_)
        )
    }

    fn selector(tag: &str, outbounds: Vec<String>) -> Self {
        let default = outbounds.first().cloned();
        Outbound::Selector {
            tag: tag.to_string(),
            outbounds,
            default,
        }
    }
}

/// Fields of a proxy outbound. Unused fields are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProxyOutbound {
    pub tag: String,
    pub server: String,
    pub server_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alter_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub congestion_control: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up_mbps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down_mbps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obfs: Option<Obfs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<OutboundTls>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<Transport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Obfs {
    #[serde(rename = "type")]
    pub kind: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutboundTls {
    pub enabled: bool,
    pub server_name: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub insecure: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alpn: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utls: Option<Utls>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reality: Option<Reality>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Utls {
    pub enabled: bool,
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reality {
    pub enabled: bool,
    pub public_key: String,
    pub short_id: String,
}

/// V2Ray transport block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Transport {
    Ws {
        path: String,
        #[serde(skip_serializing_if = "std::collections::BTreeMap::is_empty")]
        headers: std::collections::BTreeMap<String, String>,
    },
    Grpc {
        service_name: String,
    },
    Http {
        #[serde(skip_serializing_if = "Vec::is_empty")]
        host: Vec<String>,
        path: String,
    },
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

/// Parses a bandwidth string such as `100 Mbps`, `1 Gbps` or `50` into Mbps.
pub(crate) fn parse_mbps(s: &str) -> Option<u32> {
    let s = s.trim();
    let number: String = s
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let value: f64 = number.parse().ok()?;
    let unit = s[number.len()..].trim().to_ascii_lowercase();
    let mbps = match unit.as_str() {
        "" | "m" | "mbps" => value,
        "g" | "gbps" => value * 1000.0,
        "k" | "kbps" => value / 1000.0,
        _ => return None,
    };
    if !mbps.is_finite() || mbps <= 0.0 || mbps > f64::from(u32::MAX) {
        return None;
    }
    // Anything positive rounds to at least 1 Mbps.
    Some((mbps.round() as u32).max(1))
}

fn tls_block(node: &Node) -> Option<OutboundTls> {
    if !node.tls {
        return None;
    }
    Some(OutboundTls {
        enabled: true,
        server_name: node.server_name().to_string(),
        insecure: node.insecure,
        alpn: node.alpn.clone(),
        utls: non_empty(&node.fingerprint).map(|fingerprint| Utls {
            enabled: true,
            fingerprint,
        }),
        reality: non_empty(&node.reality_public_key).map(|public_key| Reality {
            enabled: true,
            public_key,
            short_id: node.reality_short_id.clone(),
        }),
    })
}

fn transport_block(node: &Node) -> Option<Transport> {
    match node.transport() {
        "ws" => {
            let mut headers = std::collections::BTreeMap::new();
            if !node.host.is_empty() {
                headers.insert("Host".to_string(), node.host.clone());
            }
            Some(Transport::Ws {
                path: node.path.clone(),
                headers,
            })
        }
        "grpc" => Some(Transport::Grpc {
            service_name: node.service_name.clone(),
        }),
        "http" => Some(Transport::Http {
            host: non_empty(&node.host).into_iter().collect(),
            path: node.path.clone(),
        }),
        _ => None,
    }
}

/// Converts a node into its engine outbound under `tag`.
pub fn node_outbound(node: &Node, tag: String) -> Outbound {
    let mut out = ProxyOutbound {
        tag,
        server: node.address.clone(),
        server_port: node.port,
        tls: tls_block(node),
        ..Default::default()
    };
    match node.protocol {
        Protocol::Shadowsocks => {
            out.method = non_empty(&node.method);
            out.password = non_empty(&node.password);
            Outbound::Shadowsocks(out)
        }
        Protocol::Vmess => {
            out.uuid = non_empty(&node.uuid);
            out.security = Some(node.cipher().to_string());
            out.alter_id = Some(node.alter_id);
            out.transport = transport_block(node);
            Outbound::Vmess(out)
        }
        Protocol::Trojan => {
            out.password = non_empty(&node.password);
            out.transport = transport_block(node);
            Outbound::Trojan(out)
        }
        Protocol::Vless => {
            out.uuid = non_empty(&node.uuid);
            out.flow = non_empty(&node.flow);
            out.transport = transport_block(node);
            Outbound::Vless(out)
        }
        Protocol::Hysteria2 => {
            out.password = non_empty(&node.password);
            out.up_mbps = parse_mbps(&node.up);
            out.down_mbps = parse_mbps(&node.down);
            out.obfs = non_empty(&node.obfs).map(|kind| Obfs {
                kind,
                password: node.obfs_password.clone(),
            });
            Outbound::Hysteria2(out)
        }
        Protocol::Tuic => {
            out.uuid = non_empty(&node.uuid);
            out.password = non_empty(&node.password);
            out.congestion_control = Some(node.congestion().to_string());
            Outbound::Tuic(out)
        }
    }
}

/// Returns the latency group tag of a group.
pub fn auto_tag(group_name: &str) -> String {
    format!("{}{}", group_name, AUTO_SUFFIX)
}

/// Hands out `{groupID}-{nodeName}` tags, suffixing repeats with `-2`, `-3`...
#[derive(Debug, Default)]
struct TagAllocator {
    used: HashSet<String>,
}

impl TagAllocator {
    fn allocate(&mut self, base: String) -> String {
        if self.used.insert(base.clone()) {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}-{}", base, n);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Builds the ordered outbound list from the matched groups.
///
/// Only active groups with at least one member are emitted.
pub fn build_outbounds(groups: &[MatchedGroup]) -> Vec<Outbound> {
    let active: Vec<&MatchedGroup> = groups
        .iter()
        .filter(|g| g.group.active && !g.nodes.is_empty())
        .collect();

    let mut outbounds = vec![
        Outbound::Direct {
            tag: OUTBOUND_DIRECT.to_string(),
        },
        Outbound::Block {
            tag: OUTBOUND_BLOCK.to_string(),
        },
        Outbound::Dns {
            tag: OUTBOUND_DNS.to_string(),
        },
    ];

    let mut tags = TagAllocator::default();
    let mut members: Vec<Vec<String>> = Vec::with_capacity(active.len());
    for matched in &active {
        let mut group_tags = Vec::with_capacity(matched.nodes.len());
        for node in &matched.nodes {
            let tag = tags.allocate(format!("{}-{}", matched.group.id, node.name));
            outbounds.push(node_outbound(node, tag.clone()));
            group_tags.push(tag);
        }
        members.push(group_tags);
    }

    for (matched, group_tags) in active.iter().zip(&members) {
        outbounds.push(Outbound::selector(&matched.group.name, group_tags.clone()));
    }

    for (matched, group_tags) in active.iter().zip(&members) {
        outbounds.push(Outbound::Urltest {
            tag: auto_tag(&matched.group.name),
            outbounds: group_tags.clone(),
            url: URLTEST_URL.to_string(),
            interval: URLTEST_INTERVAL.to_string(),
            tolerance: URLTEST_TOLERANCE,
        });
    }

    // Auto-mode groups offer their latency group first.
    let choices: Vec<String> = active
        .iter()
        .flat_map(|m| {
            let name = m.group.name.clone();
            let auto = auto_tag(&name);
            match m.group.mode {
                GroupMode::Auto => [auto, name],
                GroupMode::Select => [name, auto],
            }
        })
        .collect();

    let mut node_select = choices.clone();
    node_select.push(OUTBOUND_DIRECT.to_string());
    outbounds.push(Outbound::selector(NODE_SELECT, node_select));

    for category in RULE_GROUPS {
        let order: Vec<String> = match category.preference {
            Preference::Proxy => std::iter::once(NODE_SELECT.to_string())
                .chain(choices.iter().cloned())
                .chain(std::iter::once(OUTBOUND_DIRECT.to_string()))
                .collect(),
            Preference::Direct => [OUTBOUND_DIRECT, NODE_SELECT]
                .iter()
                .map(|s| s.to_string())
                .chain(choices.iter().cloned())
                .collect(),
            Preference::Block => [OUTBOUND_BLOCK, OUTBOUND_DIRECT, NODE_SELECT]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };
        outbounds.push(Outbound::selector(category.name, order));
    }

    outbounds
}
