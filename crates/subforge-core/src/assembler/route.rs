//! Routing section: fixed leading rules, one rule per traffic category and the
//! local rule-set descriptors they reference.

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;

use crate::rule_set::{RuleSet, NODE_SELECT, OUTBOUND_DIRECT, OUTBOUND_DNS, RULE_GROUPS};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    pub rules: Vec<RouteRule>,
    pub rule_set: Vec<RuleSetRef>,
    #[serde(rename = "final")]
    pub final_outbound: String,
    pub auto_detect_interface: bool,
}

/// A routing rule. Routing is first-match-wins.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RouteRule {
    /// `{"type": "logical", "mode": "or", "rules": [...], "outbound": ...}`
    Logical {
        #[serde(rename = "type")]
        kind: &'static str,
        mode: &'static str,
        rules: Vec<MatchRule>,
        outbound: String,
    },
    Match {
        #[serde(flatten)]
        matcher: MatchRule,
        outbound: String,
    },
}

impl RouteRule {
    /// Returns the target outbound.
    pub fn outbound(&self) -> &str {
        match self {
            RouteRule::Logical { outbound, .. } | RouteRule::Match { outbound, .. } => outbound,
        }
    }
}

/// Matching conditions of a rule. Unset fields are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_is_private: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rule_set: Vec<String>,
}

/// A local binary rule-set file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleSetRef {
    pub tag: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub format: &'static str,
    pub path: String,
}

/// DNS traffic goes to the DNS sink ahead of everything else.
fn dns_hijack_rule() -> RouteRule {
    RouteRule::Logical {
        kind: "logical",
        mode: "or",
        rules: vec![
            MatchRule {
                protocol: Some("dns".to_string()),
                ..Default::default()
            },
            MatchRule {
                port: Some(53),
                ..Default::default()
            },
        ],
        outbound: OUTBOUND_DNS.to_string(),
    }
}

/// Builds the routing section from the enabled rule sets.
///
/// Each category becomes one rule listing its enabled sets; a category with
/// none enabled is left out. Each referenced tag gets exactly one descriptor.
pub fn build_route(rule_sets: &[RuleSet], rule_set_dir: &Path) -> Route {
    let mut rules = vec![
        dns_hijack_rule(),
        RouteRule::Match {
            matcher: MatchRule {
                ip_is_private: Some(true),
                ..Default::default()
            },
            outbound: OUTBOUND_DIRECT.to_string(),
        },
    ];
    let mut descriptors = Vec::new();
    let mut declared = HashSet::new();

    for category in RULE_GROUPS {
        let enabled: Vec<&RuleSet> = category
            .rule_sets
            .iter()
            .filter_map(|tag| rule_sets.iter().find(|s| s.tag == *tag && s.enabled))
            .collect();
        if enabled.is_empty() {
            continue;
        }
        for set in &enabled {
            if declared.insert(set.tag.clone()) {
                descriptors.push(RuleSetRef {
                    tag: set.tag.clone(),
                    kind: "local",
                    format: "binary",
                    path: set.local_path(rule_set_dir).to_string_lossy().into_owned(),
                });
            }
        }
        rules.push(RouteRule::Match {
            matcher: MatchRule {
                rule_set: enabled.iter().map(|s| s.tag.clone()).collect(),
                ..Default::default()
            },
            outbound: category.name.to_string(),
        });
    }

    Route {
        rules,
        rule_set: descriptors,
        final_outbound: NODE_SELECT.to_string(),
        auto_detect_interface: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule_set::built_in_rule_sets;

    #[test]
    fn dns_rule_comes_first() {
        let route = build_route(&built_in_rule_sets(), Path::new("/rules"));
        let json = serde_json::to_value(&route).unwrap();
        let first = &json["rules"][0];
        assert_eq!(first["type"], "logical");
        assert_eq!(first["mode"], "or");
        assert_eq!(first["rules"][0]["protocol"], "dns");
        assert_eq!(first["rules"][1]["port"], 53);
        assert_eq!(first["outbound"], "dns");
        assert_eq!(json["rules"][1]["ip_is_private"], true);
        assert_eq!(json["final"], NODE_SELECT);
    }

    #[test]
    fn shared_tags_are_declared_once() {
        let sets = built_in_rule_sets();
        let route = build_route(&sets, Path::new("/rules"));
        assert_eq!(route.rule_set.len(), sets.len());
        assert_eq!(route.rules.len(), 2 + RULE_GROUPS.len());

        let google = route
            .rule_set
            .iter()
            .filter(|r| r.tag == "geosite-google")
            .count();
        assert_eq!(google, 1);
        let cn = route.rule_set.iter().find(|r| r.tag == "geosite-cn").unwrap();
        assert_eq!(cn.path, "/rules/geosite-cn.srs");
        assert_eq!(cn.format, "binary");
    }

    #[test]
    fn disabled_sets_are_left_out() {
        let mut sets = built_in_rule_sets();
        for set in sets.iter_mut() {
            if set.tag == "geosite-category-ads-all" || set.tag == "geoip-cn" {
                set.enabled = false;
            }
        }
        let route = build_route(&sets, Path::new("/rules"));
        assert!(route.rules.iter().all(|r| r.outbound() != "广告拦截"));
        assert!(route.rule_set.iter().all(|r| r.tag != "geoip-cn"));

        let domestic = route
            .rules
            .iter()
            .find(|r| r.outbound() == "国内服务")
            .unwrap();
        match domestic {
            RouteRule::Match { matcher, .. } => assert_eq!(matcher.rule_set, vec!["geosite-cn"]),
            other => panic!("unexpected {:?}", other),
        }
    }
}
