use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::interp::InterpolatorSettings;
use crate::protocol::{LoginCredentials, SessionConfig, TransportConfig};

pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:4201";

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("overlay-sync")
        .join("config.json")
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    pub session: SessionConfig,
    pub interpolation: InterpolatorSettings,
    pub transport: TransportConfig,
    /// Level data packets a player may be missing from before it is dropped
    pub stale_eviction_packets: u32,
    /// Replace the configured nominal delta with `1 / tps` after login
    pub expected_delta_from_tps: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 4201)),
            session: SessionConfig::default(),
            interpolation: InterpolatorSettings::default(),
            transport: TransportConfig::default(),
            stale_eviction_packets: 30,
            expected_delta_from_tps: true,
        }
    }
}

impl ClientConfig {
    pub fn new(server_addr: SocketAddr) -> Self {
        Self {
            server_addr,
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, credentials: LoginCredentials) -> Self {
        self.session.credentials = Some(credentials);
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    /// Load from [`config_path`], falling back to defaults when the file is absent.
    pub fn load_default() -> Result<Self> {
        let path = config_path();
        if path.exists() {
            Self::from_json_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config() {
        let addr: SocketAddr = "10.0.0.2:4202".parse().unwrap();
        let config = ClientConfig::new(addr).with_credentials(LoginCredentials::new(3, "bot", "t"));

        assert_eq!(config.server_addr, addr);
        assert_eq!(config.session.credentials.as_ref().unwrap().name, "bot");
        assert_eq!(DEFAULT_SERVER_ADDR.parse::<SocketAddr>().unwrap(), ClientConfig::default().server_addr);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ClientConfig::from_json_str(
            r#"{ "server_addr": "192.168.1.5:9000", "interpolation": { "realtime": true } }"#,
        )
        .unwrap();

        assert_eq!(config.server_addr.port(), 9000);
        assert!(config.interpolation.realtime);
        assert_eq!(config.interpolation.expected_delta, InterpolatorSettings::default().expected_delta);
        assert_eq!(config.session.keepalive_interval_ms, 5_000);
        assert_eq!(config.stale_eviction_packets, 30);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = ClientConfig::default().with_credentials(LoginCredentials::new(1, "a", "b"));
        let json = config.to_json_pretty().unwrap();
        assert_eq!(ClientConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_bad_json_is_config_error() {
        assert!(matches!(ClientConfig::from_json_str("{ nope"), Err(Error::Config(_))));
        assert!(matches!(
            ClientConfig::from_json_file("/definitely/not/here.json"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_config_path() {
        assert!(config_path().ends_with("overlay-sync/config.json"));
    }
}
