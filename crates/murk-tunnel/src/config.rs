//! Tunnel connection configuration.
//!
//! One `TunnelConfig` is an immutable snapshot shared by every connection
//! it spawns; nothing in the engine mutates it after construction.

use murk_core::defaults::{MSS_TUNE_RANGE, RELAY_MSS};
use serde::{Deserialize, Serialize};

/// Per-tunnel configuration snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Remote peer: an IP literal, or a domain name when
    /// `resolve_as_domain` is set.
    pub remote_ip: String,

    /// Remote peer port (1..=65535).
    pub remote_port: u16,

    /// Treat `remote_ip` as a domain name and resolve it asynchronously.
    #[serde(default)]
    pub resolve_as_domain: bool,

    /// Enable TCP_NODELAY on the remote socket.
    #[serde(default)]
    pub turbo: bool,

    /// Enable TCP fast-open on the remote socket.
    #[serde(default)]
    pub fast_open: bool,

    /// Run the keep-alive junk-write cycle and read drain.
    #[serde(default)]
    pub keep_alived: bool,

    /// Upper cap on the obfuscated handshake packet size. Must be at
    /// least 510 for handshakes to be permitted; values inside
    /// [510, 65536] also lower this connection's relay buffer.
    #[serde(default = "default_alignment")]
    pub alignment: usize,

    /// Advertised peer-facing endpoint, used by the socket factory
    /// overload that builds the remote endpoint from configuration.
    #[serde(default)]
    pub inbound: EndpointConfig,
}

/// An ip/port endpoint as it appears in config files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: u16,
}

impl TunnelConfig {
    /// Effective relay buffer size for connections under this config:
    /// `alignment` when it falls inside the tuning range, the 64 KiB
    /// default otherwise.
    pub fn mss(&self) -> usize {
        if MSS_TUNE_RANGE.contains(&self.alignment) {
            self.alignment
        } else {
            RELAY_MSS
        }
    }
}

fn default_alignment() -> usize {
    murk_core::defaults::HANDSHAKE_MIN_ALIGNMENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use murk_core::defaults::HANDSHAKE_MIN_ALIGNMENT;

    #[test]
    fn parse_tunnel_config() {
        let toml_str = r#"
remote_ip = "203.0.113.7"
remote_port = 443
turbo = true
keep_alived = true
alignment = 1024

[inbound]
ip = "198.51.100.2"
port = 8443
"#;
        let config: TunnelConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.remote_ip, "203.0.113.7");
        assert_eq!(config.remote_port, 443);
        assert!(config.turbo);
        assert!(!config.fast_open); // default
        assert!(!config.resolve_as_domain); // default
        assert!(config.keep_alived);
        assert_eq!(config.alignment, 1024);
        assert_eq!(config.inbound.ip, "198.51.100.2");
        assert_eq!(config.inbound.port, 8443);
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config: TunnelConfig = toml::from_str(
            r#"
remote_ip = "relay.example.net"
remote_port = 9000
resolve_as_domain = true
"#,
        )
        .unwrap();
        assert!(config.resolve_as_domain);
        assert_eq!(config.alignment, HANDSHAKE_MIN_ALIGNMENT);
        assert_eq!(config.inbound.port, 0);
    }

    #[test]
    fn mss_follows_alignment_inside_range() {
        let mut config: TunnelConfig = toml::from_str(
            r#"
remote_ip = "127.0.0.1"
remote_port = 1
"#,
        )
        .unwrap();

        config.alignment = 1024;
        assert_eq!(config.mss(), 1024);

        config.alignment = HANDSHAKE_MIN_ALIGNMENT;
        assert_eq!(config.mss(), HANDSHAKE_MIN_ALIGNMENT);

        config.alignment = RELAY_MSS;
        assert_eq!(config.mss(), RELAY_MSS);

        // Outside the tuning range the default wins.
        config.alignment = 100;
        assert_eq!(config.mss(), RELAY_MSS);
        config.alignment = RELAY_MSS + 1;
        assert_eq!(config.mss(), RELAY_MSS);
    }
}
