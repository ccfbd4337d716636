use clap::Parser;
use reqwest::Url;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::Uuid;

/// Agent configuration, read from the command line with environment
/// variable fallbacks.
#[derive(Parser, Debug, Clone)]
#[command(name = "tether", about = "Edge-device configuration sync agent")]
pub struct AgentConfig {
    /// Base URL of the hub API, e.g. https://hub.example.io/v1/devices
    #[arg(long, env = "TETHER_API_ENDPOINT")]
    pub api_endpoint: Url,

    /// Device identity assigned by the hub
    #[arg(long, env = "TETHER_UUID")]
    pub uuid: Uuid,

    /// Device access key, sent with every API call
    #[arg(long, env = "TETHER_ACCESS_KEY")]
    pub access_key: String,

    /// Keep-alive telemetry interval in milliseconds
    #[arg(long, env = "TETHER_KEEP_ALIVE_MS", default_value_t = 300_000)]
    pub keep_alive_ms: u64,

    /// Per-request timeout in milliseconds
    #[arg(long, env = "TETHER_REQUEST_TIMEOUT_MS", default_value_t = 15_000)]
    pub request_timeout_ms: u64,

    /// Override for the local state directory holding cached
    /// configuration documents
    #[arg(long, env = "TETHER_STATE_DIR")]
    pub state_dir: Option<PathBuf>,
}

impl AgentConfig {
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_defaults() {
        let config = AgentConfig::parse_from([
            "tether",
            "--api-endpoint",
            "https://hub.example.io/v1/devices",
            "--uuid",
            "dev-1",
            "--access-key",
            "key-1",
        ]);

        assert_eq!(config.keep_alive_interval(), Duration::from_secs(300));
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
        assert!(config.state_dir.is_none());
    }
}
