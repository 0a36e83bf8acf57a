//! User-tunable settings that feed the generated document.
//!
//! Persisted as JSON; every field has a working default so a fresh install
//! produces a usable document.

use serde::{Deserialize, Serialize};

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Engine log level (`trace` .. `panic`).
    pub log_level: String,
    /// Local inbounds.
    pub inbound: InboundSettings,
    /// Resolver setup.
    pub dns: DnsSettings,
    /// Engine control API.
    pub experimental: ExperimentalSettings,
    /// Network behaviour of downloads and probes.
    pub network: NetworkSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            inbound: InboundSettings::default(),
            dns: DnsSettings::default(),
            experimental: ExperimentalSettings::default(),
            network: NetworkSettings::default(),
        }
    }
}

/// Local listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundSettings {
    /// Mixed (HTTP + SOCKS) listen address.
    pub listen: String,
    /// Mixed listen port.
    pub mixed_port: u16,
    /// Set the system proxy on start.
    pub set_system_proxy: bool,
    /// Add a TUN inbound.
    pub tun_enabled: bool,
    /// TUN interface address (CIDR).
    pub tun_address: String,
    /// TUN network stack (`system`, `gvisor`, `mixed`).
    pub tun_stack: String,
}

impl Default for InboundSettings {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1".to_string(),
            mixed_port: 7890,
            set_system_proxy: false,
            tun_enabled: false,
            tun_address: "172.19.0.1/30".to_string(),
            tun_stack: "mixed".to_string(),
        }
    }
}

/// Resolver addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsSettings {
    /// Plain resolver used to look up the other resolvers' hostnames.
    pub bootstrap: String,
    /// Resolver for domestic domains, reached directly.
    pub domestic: String,
    /// Resolver for everything else, reached through the node choice.
    pub remote: String,
    /// `prefer_ipv4`, `prefer_ipv6`, `ipv4_only` or `ipv6_only`.
    pub strategy: String,
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self {
            bootstrap: "223.5.5.5".to_string(),
            domestic: "https://dns.alidns.com/dns-query".to_string(),
            remote: "https://1.1.1.1/dns-query".to_string(),
            strategy: "prefer_ipv4".to_string(),
        }
    }
}

/// Engine-side extras.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentalSettings {
    /// Clash-compatible controller address; empty disables it.
    pub clash_api: String,
    /// Persist selector choices across engine restarts.
    pub cache_file: bool,
}

impl Default for ExperimentalSettings {
    fn default() -> Self {
        Self {
            clash_api: "127.0.0.1:9090".to_string(),
            cache_file: true,
        }
    }
}

/// Download and probe limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// User-Agent sent with subscription and rule-set downloads.
    pub user_agent: String,
    /// Download deadline in seconds.
    pub download_timeout_secs: u64,
    /// Per-node probe deadline in milliseconds.
    pub probe_timeout_ms: u64,
    /// Maximum probes in flight.
    pub probe_concurrency: usize,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            user_agent: concat!("subforge/", env!("CARGO_PKG_VERSION")).to_string(),
            download_timeout_secs: 30,
            probe_timeout_ms: 3000,
            probe_concurrency: 32,
        }
    }
}
