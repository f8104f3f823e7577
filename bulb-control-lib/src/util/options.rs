use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Port the bulbs listen on for search requests, and advertise from.
pub const DEFAULT_PORT: u16 = 1982;
pub const DEFAULT_MULTICAST_ADDRESS: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const DEFAULT_DISCOVERY_MESSAGE: &str =
    "M-SEARCH * HTTP/1.1\r\nMAN: \"ssdp:discover\"\r\nST: wifi_bulb\r\n";
/// Transition duration used when a command does not name one.
pub const DEFAULT_DURATION_MS: u64 = 300;

/// What to do with an open control connection when the device re-advertises
/// a different `Location`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Leave the open connection alone, even though it may now point at a
    /// stale endpoint.
    #[default]
    Keep,
    /// Close the open connection and connect to the new endpoint.
    Reconnect,
}

/// Settings for discovery and device control.
///
/// Every field has a default, so a partial YAML document is enough:
///
/// ```yaml
/// port: 1982
/// local_address: 192.168.1.20
/// reconnect_policy: reconnect
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryOptions {
    /// Local UDP port to bind, and destination port of search requests.
    pub port: u16,
    pub multicast_address: Ipv4Addr,
    pub discovery_message: String,
    /// Join the multicast group so unsolicited `NOTIFY` advertisements arrive.
    pub join_multicast: bool,
    /// Address of this host, used to drop our own search request when it
    /// loops back. Detected from the routing table when not set.
    pub local_address: Option<IpAddr>,
    pub reconnect_policy: ReconnectPolicy,
    pub default_duration_ms: u64,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        DiscoveryOptions {
            port: DEFAULT_PORT,
            multicast_address: DEFAULT_MULTICAST_ADDRESS,
            discovery_message: DEFAULT_DISCOVERY_MESSAGE.to_string(),
            join_multicast: true,
            local_address: None,
            reconnect_policy: ReconnectPolicy::default(),
            default_duration_ms: DEFAULT_DURATION_MS,
        }
    }
}

impl DiscoveryOptions {
    pub fn default_duration(&self) -> Duration {
        Duration::from_millis(self.default_duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = DiscoveryOptions::default();
        assert_eq!(options.port, 1982);
        assert_eq!(options.multicast_address.to_string(), "239.255.255.250");
        assert!(options.discovery_message.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(options.discovery_message.contains("ST: wifi_bulb\r\n"));
        assert_eq!(options.reconnect_policy, ReconnectPolicy::Keep);
        assert_eq!(options.default_duration(), Duration::from_millis(300));
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let options: DiscoveryOptions =
            serde_json::from_str(r#"{"port": 1983, "reconnect_policy": "reconnect"}"#).unwrap();
        assert_eq!(options.port, 1983);
        assert_eq!(options.reconnect_policy, ReconnectPolicy::Reconnect);
        assert_eq!(options.multicast_address, DEFAULT_MULTICAST_ADDRESS);
        assert!(options.join_multicast);
        assert_eq!(options.local_address, None);
    }
}
