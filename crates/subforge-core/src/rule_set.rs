//! Static rule-set registry and the traffic categories that use it.
//!
//! Rule sets are remote binary `.srs` files published by SagerNet. The
//! registry below is seeded into storage once; afterwards only the `enabled`
//! flag and the refresh timestamp change.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Outbound tags shared by the assembler and the routing rules
// =============================================================================

/// Direct connection sink.
pub const OUTBOUND_DIRECT: &str = "direct";
/// Drop sink.
pub const OUTBOUND_BLOCK: &str = "block";
/// DNS hijack sink.
pub const OUTBOUND_DNS: &str = "dns";
/// Top-level node choice, the routing fallback.
pub const NODE_SELECT: &str = "节点选择";

const GEOSITE_BASE: &str = "https://raw.githubusercontent.com/SagerNet/sing-geosite/rule-set";
const GEOIP_BASE: &str = "https://raw.githubusercontent.com/SagerNet/sing-geoip/rule-set";

/// What a rule set matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSetType {
    /// Domain rules (geosite).
    Domain,
    /// IP CIDR rules (geoip).
    Ip,
}

impl RuleSetType {
    /// Returns the stored name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleSetType::Domain => "domain",
            RuleSetType::Ip => "ip",
        }
    }

    /// Parses a stored name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "domain" => Some(RuleSetType::Domain),
            "ip" => Some(RuleSetType::Ip),
            _ => None,
        }
    }
}

/// A rule-set registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Unique tag, also referenced from routing and DNS rules.
    pub tag: String,
    /// Remote download URL.
    pub url: String,
    /// File name inside the rule-set directory.
    pub path: String,
    /// Match kind.
    #[serde(rename = "type")]
    pub kind: RuleSetType,
    /// Category selector that traffic matching this set goes to.
    pub outbound: String,
    /// Disabled sets are left out of the generated document.
    pub enabled: bool,
    /// Last successful download.
    pub updated_at: Option<DateTime<Utc>>,
}

impl RuleSet {
    fn built_in(tag: &str, outbound: &str) -> Self {
        let (kind, base) = if tag.starts_with("geoip-") {
            (RuleSetType::Ip, GEOIP_BASE)
        } else {
            (RuleSetType::Domain, GEOSITE_BASE)
        };
        Self {
            tag: tag.to_string(),
            url: format!("{}/{}.srs", base, tag),
            path: format!("{}.srs", tag),
            kind,
            outbound: outbound.to_string(),
            enabled: true,
            updated_at: None,
        }
    }

    /// Resolves the local file path against the rule-set directory.
    pub fn local_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.path)
    }
}

/// Default choice of a category selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preference {
    /// Go through the node choice first.
    Proxy,
    /// Connect directly first.
    Direct,
    /// Drop first.
    Block,
}

/// A traffic category: a set of rule sets routed to one selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleGroup {
    /// Selector tag and display name.
    pub name: &'static str,
    /// Rule-set tags matched by this category.
    pub rule_sets: &'static [&'static str],
    /// What the category selector offers first.
    pub preference: Preference,
}

/// Traffic categories in routing order.
pub const RULE_GROUPS: &[RuleGroup] = &[
    RuleGroup {
        name: "广告拦截",
        rule_sets: &["geosite-category-ads-all"],
        preference: Preference::Block,
    },
    RuleGroup {
        name: "流媒体",
        rule_sets: &["geosite-netflix", "geosite-youtube", "geosite-disney", "geoip-netflix"],
        preference: Preference::Proxy,
    },
    RuleGroup {
        name: "社交媒体",
        rule_sets: &["geosite-telegram", "geosite-twitter", "geosite-facebook", "geoip-telegram"],
        preference: Preference::Proxy,
    },
    RuleGroup {
        name: "搜索引擎",
        rule_sets: &["geosite-google", "geosite-bing"],
        preference: Preference::Proxy,
    },
    RuleGroup {
        name: "开发者服务",
        rule_sets: &["geosite-github", "geosite-google"],
        preference: Preference::Proxy,
    },
    RuleGroup {
        name: "国内服务",
        rule_sets: &["geosite-cn", "geoip-cn"],
        preference: Preference::Direct,
    },
    RuleGroup {
        name: "国际服务",
        rule_sets: &["geosite-geolocation-!cn"],
        preference: Preference::Proxy,
    },
];

/// Domain set resolved through the domestic DNS server.
pub const DOMESTIC_DOMAINS: &str = "geosite-cn";
/// Domain set resolved through the remote DNS server.
pub const FOREIGN_DOMAINS: &str = "geosite-geolocation-!cn";

/// Returns the built-in registry: one entry per distinct tag referenced by
/// [`RULE_GROUPS`], bound to the first category that references it.
pub fn built_in_rule_sets() -> Vec<RuleSet> {
    let mut sets: Vec<RuleSet> = Vec::new();
    for group in RULE_GROUPS {
        for tag in group.rule_sets {
            if !sets.iter().any(|s| s.tag == *tag) {
                sets.push(RuleSet::built_in(tag, group.name));
            }
        }
    }
    sets
}
