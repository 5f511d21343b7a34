//! Configuration module for the x402 facilitator server.

use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use x402_facilitator_local::ledger::Eip155LedgerConfig;

/// CLI arguments for the x402 facilitator server.
#[derive(Parser, Debug)]
#[command(name = "x402-facilitator")]
#[command(about = "x402 Facilitator HTTP server")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// Server configuration.
///
/// ```json
/// {
///   "network": "base-sepolia",
///   "rpc": { "http": "$RPC_URL_BASE_SEPOLIA" },
///   "signer": "$SETTLEMENT_PRIVATE_KEY",
///   "settleTimeoutSecs": 60
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    network: String,
    #[serde(flatten)]
    ledger: Eip155LedgerConfig,
    #[serde(default = "config_defaults::settle_timeout_secs")]
    settle_timeout_secs: u64,
}

pub mod config_defaults {
    use std::env;
    use std::net::{IpAddr, Ipv4Addr};

    pub const DEFAULT_PORT: u16 = 8080;

    /// Returns the default port value with fallback: $PORT env var -> 8080
    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// Returns the default host value with fallback: $HOST env var -> "0.0.0.0"
    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    pub fn settle_timeout_secs() -> u64 {
        60
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    /// Network name or CAIP-2 identifier, e.g. `"base-sepolia"` or `"eip155:84532"`.
    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn ledger(&self) -> &Eip155LedgerConfig {
        &self.ledger
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_secs(self.settle_timeout_secs)
    }

    /// Load configuration from CLI arguments and JSON file.
    ///
    /// The config file path is determined by:
    /// 1. `--config <path>` CLI argument or `$CONFIG`
    /// 2. `./config.json`
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = Path::new(&cli_args.config)
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(cli_args.config, e))?;
        Self::load_from_path(config_path)
    }

    fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flattened_ledger() {
        let config: Config = serde_json::from_str(
            r#"{
                "network": "eip155:84532",
                "port": 9090,
                "rpc": { "http": "http://localhost:8545", "rate_limit": 5 },
                "signer": "0x0101010101010101010101010101010101010101010101010101010101010101"
            }"#,
        )
        .unwrap();
        assert_eq!(config.port(), 9090);
        assert_eq!(config.network(), "eip155:84532");
        assert_eq!(config.ledger().rpc.rate_limit, Some(5));
        assert_eq!(config.ledger().receipt_timeout_secs, 30);
        assert_eq!(config.settle_timeout(), Duration::from_secs(60));
    }
}
