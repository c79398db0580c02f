//! Configuration shared by client and server.
//!
//! Loads from JSON strings/files (file IO left to the caller); CLI binaries
//! layer `--flag value` argument parsing on top of the defaults here.

use serde::{Deserialize, Serialize};

use crate::discovery::{DEFAULT_DISCOVERY_PERIOD, DEFAULT_DISCOVERY_PORT};

/// Root configuration shared by the relay client and server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Server listen address, e.g. `127.0.0.1:50000`.
    pub server_addr: String,
    /// UDP discovery port.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Seconds between discovery broadcasts.
    #[serde(default = "default_discovery_period_secs")]
    pub discovery_period_secs: u64,
    /// Number of slave sockets a client opens alongside its master socket.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// This client's or server's name on the wire / discovery beacon.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_discovery_port() -> u16 {
    DEFAULT_DISCOVERY_PORT
}

fn default_discovery_period_secs() -> u64 {
    DEFAULT_DISCOVERY_PERIOD.as_secs()
}

fn default_pool_size() -> usize {
    4
}

fn default_service_name() -> String {
    "relay".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:50000".to_string(),
            discovery_port: default_discovery_port(),
            discovery_period_secs: default_discovery_period_secs(),
            pool_size: default_pool_size(),
            service_name: default_service_name(),
        }
    }
}

impl RelayConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn discovery_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.discovery_period_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_ports() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.discovery_port, 50001);
        assert_eq!(cfg.pool_size, 4);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let cfg = RelayConfig::from_json_str(r#"{"server_addr":"10.0.0.1:9000"}"#).unwrap();
        assert_eq!(cfg.server_addr, "10.0.0.1:9000");
        assert_eq!(cfg.discovery_port, 50001);
    }
}
