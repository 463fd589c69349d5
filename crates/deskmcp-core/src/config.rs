//! Configuration types for deskmcp

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the deskmcp service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server port
    pub port: u16,
    /// Directory holding the device registry and the secret key
    /// (defaults to ~/.config/deskmcp when None)
    pub data_dir: Option<PathBuf>,
    /// Lifetime of a pairing code in seconds
    pub pairing_ttl_secs: i64,
    /// How long an unauthenticated connection may linger before it is closed
    pub auth_timeout_secs: u64,
    /// Keepalive ping interval for signaling connections
    pub ping_interval_secs: u64,
    /// Interval of the background cleanup sweep
    pub sweep_interval_secs: u64,
    /// Devices not seen for this long are flagged inactive by the sweep
    pub inactive_after_secs: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8787,
            data_dir: None,
            pairing_ttl_secs: 120,
            auth_timeout_secs: 30,
            ping_interval_secs: 30,
            sweep_interval_secs: 60,
            inactive_after_secs: 600,
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: set port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder pattern: set data directory
    pub fn with_data_dir(mut self, dir: PathBuf) -> Self {
        self.data_dir = Some(dir);
        self
    }

    /// Builder pattern: set pairing code TTL
    pub fn with_pairing_ttl(mut self, secs: i64) -> Self {
        self.pairing_ttl_secs = secs;
        self
    }

    /// Builder pattern: set authentication timeout
    pub fn with_auth_timeout(mut self, secs: u64) -> Self {
        self.auth_timeout_secs = secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.port, 8787);
        assert_eq!(config.pairing_ttl_secs, 120);
        assert_eq!(config.auth_timeout_secs, 30);
    }

    #[test]
    fn test_builder() {
        let config = Config::new().with_port(9000).with_pairing_ttl(300);
        assert_eq!(config.port, 9000);
        assert_eq!(config.pairing_ttl_secs, 300);
    }
}
