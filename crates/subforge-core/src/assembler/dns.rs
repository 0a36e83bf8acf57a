//! DNS section: bootstrap, domestic and remote resolvers split by rule set.

use serde::Serialize;

use super::route::RuleSetRef;
use crate::rule_set::{DOMESTIC_DOMAINS, FOREIGN_DOMAINS, NODE_SELECT, OUTBOUND_DIRECT};
use crate::settings::DnsSettings;

/// Plain resolver, also resolves the other resolvers' hostnames.
pub const DNS_BOOTSTRAP: &str = "dns-bootstrap";
/// Domestic resolver, reached directly.
pub const DNS_DOMESTIC: &str = "dns-domestic";
/// International resolver, reached through the node choice. Also the fallback.
pub const DNS_REMOTE: &str = "dns-remote";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dns {
    pub servers: Vec<DnsServer>,
    pub rules: Vec<DnsRule>,
    #[serde(rename = "final")]
    pub final_server: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub strategy: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DnsServer {
    pub tag: String,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_resolver: Option<String>,
    pub detour: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DnsRule {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outbound: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rule_set: Vec<String>,
    pub server: String,
}

/// Builds the DNS section.
///
/// Domain-split rules are only emitted for rule sets that the routing
/// section declares.
pub fn build_dns(settings: &DnsSettings, declared: &[RuleSetRef]) -> Dns {
    let servers = vec![
        DnsServer {
            tag: DNS_BOOTSTRAP.to_string(),
            address: settings.bootstrap.clone(),
            address_resolver: None,
            detour: OUTBOUND_DIRECT.to_string(),
        },
        DnsServer {
            tag: DNS_DOMESTIC.to_string(),
            address: settings.domestic.clone(),
            address_resolver: Some(DNS_BOOTSTRAP.to_string()),
            detour: OUTBOUND_DIRECT.to_string(),
        },
        DnsServer {
            tag: DNS_REMOTE.to_string(),
            address: settings.remote.clone(),
            address_resolver: Some(DNS_BOOTSTRAP.to_string()),
            detour: NODE_SELECT.to_string(),
        },
    ];

    // Outbound server lookups must not loop through the proxy.
    let mut rules = vec![DnsRule {
        outbound: vec!["any".to_string()],
        rule_set: Vec::new(),
        server: DNS_BOOTSTRAP.to_string(),
    }];
    for (tag, server) in [(DOMESTIC_DOMAINS, DNS_DOMESTIC), (FOREIGN_DOMAINS, DNS_REMOTE)] {
        if declared.iter().any(|r| r.tag == tag) {
            rules.push(DnsRule {
                outbound: Vec::new(),
                rule_set: vec![tag.to_string()],
                server: server.to_string(),
            });
        }
    }

    Dns {
        servers,
        rules,
        final_server: DNS_REMOTE.to_string(),
        strategy: settings.strategy.clone(),
    }
}
