//! DNS resolver configuration.

use serde::{Deserialize, Serialize};

/// DNS resolver configuration.
///
/// Controls how domain names are resolved to IP addresses. When omitted
/// from config files, all fields use sensible defaults (system resolver
/// with caching enabled).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// DNS resolution strategy.
    ///
    /// - `"system"` (default): reads `/etc/resolv.conf` on Unix, system
    ///   DNS settings on Windows.
    /// - `"custom"`: uses the nameservers listed in `servers`.
    #[serde(default)]
    pub strategy: DnsStrategy,

    /// Custom nameserver URLs. Only used when `strategy = "custom"`.
    ///
    /// Supported formats:
    /// - `"udp://8.8.8.8"` or `"udp://8.8.8.8:53"` — plain UDP
    /// - `"tcp://8.8.8.8"` or `"tcp://8.8.8.8:53"` — plain TCP
    ///
    /// When a port is omitted, port 53 is used.
    #[serde(default)]
    pub servers: Vec<String>,

    /// Prefer IPv4 addresses when both A and AAAA records exist.
    #[serde(default)]
    pub prefer_ipv4: bool,

    /// DNS cache capacity (number of entries). Set to 0 to disable caching.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            strategy: DnsStrategy::default(),
            servers: Vec::new(),
            prefer_ipv4: false,
            cache_size: default_cache_size(),
        }
    }
}

/// DNS resolution strategy.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DnsStrategy {
    /// Use the system DNS resolver configuration.
    #[default]
    System,
    /// Use custom nameservers from the `servers` list.
    Custom,
}

fn default_cache_size() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_dns_config() {
        let toml_str = r#"
strategy = "custom"
servers = ["udp://10.0.0.53", "tcp://10.0.0.53:5353"]
prefer_ipv4 = true
"#;
        let config: DnsConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.strategy, DnsStrategy::Custom);
        assert_eq!(config.servers.len(), 2);
        assert!(config.prefer_ipv4);
        assert_eq!(config.cache_size, 256); // default
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: DnsConfig = toml::from_str("").unwrap();
        assert_eq!(config.strategy, DnsStrategy::System);
        assert!(config.servers.is_empty());
        assert!(!config.prefer_ipv4);
    }
}
