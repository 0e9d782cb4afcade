//! Configuration surface of the RFC 5444 stack
//!
//! Deserialized from TOML text the embedding daemon has already
//! loaded; file I/O and schema delta handling stay outside this crate.
//! A `[protocol]` section carries the wire port and the aggregation
//! interval, one `[interface.<name>]` section per interface carries
//! bind addresses, multicast groups and the ACL. An absent multicast
//! address disables that family on the interface.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use serde::Deserialize;

use types::constants::{MANET_MULTICAST_V4, MANET_MULTICAST_V6, MANET_UDP_PORT};

use crate::acl::Acl;
use crate::error::ConfigError;

/// `[protocol]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ProtocolConfig {
    /// UDP port of the wire protocol.
    pub port: u16,
    /// Time messages queue on a target before the packet is flushed.
    pub aggregation_interval_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            port: MANET_UDP_PORT,
            aggregation_interval_ms: 100,
        }
    }
}

impl ProtocolConfig {
    pub fn aggregation_interval(&self) -> Duration {
        Duration::from_millis(self.aggregation_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }
        if self.aggregation_interval_ms == 0 {
            return Err(ConfigError::ZeroAggregationInterval);
        }
        Ok(())
    }
}

/// `[interface.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct InterfaceConfig {
    /// Source-address filter for received datagrams.
    pub acl: Acl,
    /// IPv4 bind address, `None` for the wildcard.
    pub bindto_v4: Option<Ipv4Addr>,
    /// IPv6 bind address, `None` for the wildcard.
    pub bindto_v6: Option<Ipv6Addr>,
    /// IPv4 multicast group; absent disables IPv4 multicast.
    pub multicast_v4: Option<Ipv4Addr>,
    /// IPv6 multicast group; absent disables IPv6 multicast.
    pub multicast_v6: Option<Ipv6Addr>,
}

impl InterfaceConfig {
    /// Configuration with the IANA "manet" multicast groups enabled.
    pub fn manet_defaults() -> Self {
        Self {
            multicast_v4: Some(MANET_MULTICAST_V4),
            multicast_v6: Some(MANET_MULTICAST_V6),
            ..Self::default()
        }
    }
}

/// Whole configuration tree.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub protocol: ProtocolConfig,
    pub interface: BTreeMap<String, InterfaceConfig>,
}

impl Config {
    /// Parse and validate a TOML configuration.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.protocol.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_iana_assignments() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.protocol.port, 269);
        assert_eq!(config.protocol.aggregation_interval(), Duration::from_millis(100));
        assert!(config.interface.is_empty());
    }

    #[test]
    fn full_config_parses() {
        let text = r#"
[protocol]
port = 5000
aggregation_interval_ms = 250

[interface.wlan0]
acl = ["reject 192.168.0.0/16"]
bindto_v4 = "10.0.0.1"
multicast_v4 = "224.0.0.109"
multicast_v6 = "ff02::6d"

[interface.eth0]
"#;
        let config = Config::parse(text).unwrap();
        assert_eq!(config.protocol.port, 5000);
        let wlan = &config.interface["wlan0"];
        assert_eq!(wlan.bindto_v4, Some("10.0.0.1".parse().unwrap()));
        assert_eq!(wlan.multicast_v4, Some(MANET_MULTICAST_V4));
        assert_eq!(wlan.multicast_v6, Some(MANET_MULTICAST_V6));
        assert!(!wlan.acl.check(&"192.168.1.1".parse().unwrap()));
        let eth = &config.interface["eth0"];
        assert_eq!(eth.multicast_v4, None);
    }

    #[test]
    fn zero_port_is_rejected() {
        assert!(matches!(
            Config::parse("[protocol]\nport = 0\n"),
            Err(ConfigError::InvalidPort(0))
        ));
    }

    #[test]
    fn zero_aggregation_interval_is_rejected() {
        assert!(matches!(
            Config::parse("[protocol]\naggregation_interval_ms = 0\n"),
            Err(ConfigError::ZeroAggregationInterval)
        ));
    }
}
