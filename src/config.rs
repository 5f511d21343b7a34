//! Configuration of the `x402-vrf` resource server.
//!
//! ```json
//! {
//!   "network": "base-sepolia",
//!   "facilitator": { "remote": { "url": "https://facilitator.x402.rs" } },
//!   "price": "$0.05",
//!   "asset": "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
//!   "assetName": "USDC",
//!   "assetVersion": "2",
//!   "payTo": "$PAY_TO_ADDRESS",
//!   "resource": "https://vrf.example.com/mint",
//!   "description": "One verifiable random mint",
//!   "oracle": {
//!     "rpc": { "http": "$RPC_URL_BASE_SEPOLIA" },
//!     "signer": "$ORACLE_PRIVATE_KEY",
//!     "consumer": "$VRF_CONSUMER_ADDRESS",
//!     "outcomes": ["common", "rare", "legendary"]
//!   }
//! }
//! ```

use alloy_primitives::Address;
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;
use x402_facilitator_local::ledger::Eip155LedgerConfig;
use x402_oracle::eip155::OracleConfig;
use x402_types::config::LiteralOrEnv;
use x402_types::proto::{PaymentTerms, PaymentTermsExtra, Scheme};
use x402_types::util::{MoneyAmount, MoneyAmountParseError};

/// CLI arguments for the x402-vrf resource server.
#[derive(Parser, Debug)]
#[command(name = "x402-vrf")]
#[command(about = "x402-gated randomness resource server")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// Where payments are verified and settled.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FacilitatorConfig {
    /// In-process facilitator settling with a server-owned key.
    Local(LocalFacilitatorConfig),
    /// A facilitator reached over HTTP.
    Remote(RemoteFacilitatorConfig),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalFacilitatorConfig {
    #[serde(flatten)]
    pub ledger: Eip155LedgerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFacilitatorConfig {
    pub url: LiteralOrEnv<Url>,
    #[serde(default = "config_defaults::facilitator_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    network: String,
    facilitator: FacilitatorConfig,
    price: LiteralOrEnv<MoneyAmount>,
    #[serde(default = "config_defaults::decimals")]
    decimals: u32,
    asset: LiteralOrEnv<Address>,
    #[serde(default)]
    asset_name: Option<String>,
    #[serde(default)]
    asset_version: Option<String>,
    pay_to: LiteralOrEnv<Address>,
    resource: Url,
    #[serde(default)]
    description: String,
    #[serde(default = "config_defaults::mime_type")]
    mime_type: String,
    #[serde(default = "config_defaults::max_timeout_seconds")]
    max_timeout_seconds: u64,
    oracle: OracleConfig,
    #[serde(default = "config_defaults::verify_timeout_secs")]
    verify_timeout_secs: u64,
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

    pub fn decimals() -> u32 {
        6
    }

    pub fn mime_type() -> String {
        "application/json".to_string()
    }

    pub fn max_timeout_seconds() -> u64 {
        300
    }

    pub fn facilitator_timeout_secs() -> u64 {
        10
    }

    pub fn verify_timeout_secs() -> u64 {
        10
    }

    pub fn settle_timeout_secs() -> u64 {
        90
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("Invalid price: {0}")]
    Price(#[from] MoneyAmountParseError),
    #[error(
        "maxTimeoutSeconds ({max_timeout_seconds}) must exceed the oracle receipt timeout plus the settle timeout ({required})"
    )]
    AuthorizationWindow {
        max_timeout_seconds: u64,
        required: u64,
    },
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn facilitator(&self) -> &FacilitatorConfig {
        &self.facilitator
    }

    pub fn oracle(&self) -> &OracleConfig {
        &self.oracle
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_secs(self.settle_timeout_secs)
    }

    /// Validity an authorization must have left when it reaches the gate: long enough to
    /// wait for the oracle request receipt and then settle.
    pub fn min_remaining_window(&self) -> Duration {
        Duration::from_secs(self.oracle.receipt_timeout_secs + self.settle_timeout_secs)
    }

    /// Terms advertised in every 402 response of the protected route.
    ///
    /// The price is scaled into the asset's smallest unit; a price finer than the asset's
    /// precision is a configuration error.
    pub fn payment_terms(&self) -> Result<PaymentTerms, ConfigError> {
        let max_amount_required = self.price.to_token_amount(self.decimals)?;
        let extra = match (&self.asset_name, &self.asset_version) {
            (Some(name), Some(version)) => Some(PaymentTermsExtra {
                name: name.clone(),
                version: version.clone(),
            }),
            _ => None,
        };
        Ok(PaymentTerms {
            scheme: Scheme::Exact,
            network: self.network.clone(),
            max_amount_required,
            resource: self.resource.clone(),
            description: self.description.clone(),
            mime_type: self.mime_type.clone(),
            pay_to: *self.pay_to.inner(),
            max_timeout_seconds: self.max_timeout_seconds,
            asset: *self.asset.inner(),
            extra,
        })
    }

    /// Load configuration from CLI arguments and JSON file.
    ///
    /// The config file path is taken from `--config <path>` or `$CONFIG`, falling back to
    /// `./config.json`.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = Path::new(&cli_args.config)
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(cli_args.config, e))?;
        Self::load_from_path(config_path)
    }

    fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(content)?;
        let required = config.min_remaining_window().as_secs();
        if required >= config.max_timeout_seconds {
            return Err(ConfigError::AuthorizationWindow {
                max_timeout_seconds: config.max_timeout_seconds,
                required,
            });
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{U256, address};
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "network": "base-sepolia",
            "facilitator": { "remote": { "url": "https://facilitator.x402.rs" } },
            "price": "$0.05",
            "asset": "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
            "assetName": "USDC",
            "assetVersion": "2",
            "payTo": "0x2222222222222222222222222222222222222222",
            "resource": "https://vrf.example.com/mint",
            "description": "One verifiable random mint",
            "oracle": {
                "rpc": { "http": "http://localhost:8545" },
                "signer": "0x0101010101010101010101010101010101010101010101010101010101010101",
                "consumer": "0x3333333333333333333333333333333333333333",
                "outcomes": ["common", "rare"]
            }
        })
    }

    #[test]
    fn builds_payment_terms() {
        let config = Config::from_json(&sample().to_string()).unwrap();
        let terms = config.payment_terms().unwrap();
        assert_eq!(terms.max_amount_required, U256::from(50_000u64));
        assert_eq!(
            terms.pay_to,
            address!("0x2222222222222222222222222222222222222222")
        );
        assert_eq!(terms.max_timeout_seconds, 300);
        assert_eq!(terms.mime_type, "application/json");
        let extra = terms.extra.unwrap();
        assert_eq!(extra.name, "USDC");
        assert_eq!(extra.version, "2");
    }

    #[test]
    fn applies_defaults() {
        let config = Config::from_json(&sample().to_string()).unwrap();
        assert_eq!(config.verify_timeout(), Duration::from_secs(10));
        assert_eq!(config.settle_timeout(), Duration::from_secs(90));
        match config.facilitator() {
            FacilitatorConfig::Remote(remote) => assert_eq!(remote.timeout_secs, 10),
            other => panic!("unexpected facilitator config: {other:?}"),
        }
        assert_eq!(config.oracle().poll_interval_ms, 2000);
        assert_eq!(config.min_remaining_window(), Duration::from_secs(150));
    }

    #[test]
    fn authorization_window_must_outlast_trigger_and_settlement() {
        let mut value = sample();
        value["maxTimeoutSeconds"] = 60.into();
        assert!(matches!(
            Config::from_json(&value.to_string()),
            Err(ConfigError::AuthorizationWindow {
                max_timeout_seconds: 60,
                required: 150,
            })
        ));

        value["settleTimeoutSecs"] = 30.into();
        value["oracle"]["receiptTimeoutSecs"] = 20.into();
        let config = Config::from_json(&value.to_string()).unwrap();
        assert_eq!(config.min_remaining_window(), Duration::from_secs(50));
    }

    #[test]
    fn local_facilitator_flattens_ledger_config() {
        let mut value = sample();
        value["facilitator"] = json!({
            "local": {
                "rpc": { "http": "http://localhost:8545" },
                "signer": "0x0202020202020202020202020202020202020202020202020202020202020202",
                "receiptTimeoutSecs": 12
            }
        });
        let config = Config::from_json(&value.to_string()).unwrap();
        match config.facilitator() {
            FacilitatorConfig::Local(local) => {
                assert_eq!(local.ledger.receipt_timeout_secs, 12);
                assert_eq!(local.ledger.confirmations, 1);
            }
            other => panic!("unexpected facilitator config: {other:?}"),
        }
    }

    #[test]
    fn extra_requires_name_and_version() {
        let mut value = sample();
        value.as_object_mut().unwrap().remove("assetVersion");
        let config = Config::from_json(&value.to_string()).unwrap();
        assert!(config.payment_terms().unwrap().extra.is_none());
    }

    #[test]
    fn price_finer_than_asset_is_rejected() {
        let mut value = sample();
        value["price"] = "0.0000001".into();
        let config = Config::from_json(&value.to_string()).unwrap();
        assert!(matches!(
            config.payment_terms(),
            Err(ConfigError::Price(MoneyAmountParseError::WrongPrecision { .. }))
        ));
    }

    #[test]
    fn missing_required_field_is_a_parse_error() {
        let mut value = sample();
        value.as_object_mut().unwrap().remove("payTo");
        assert!(matches!(
            Config::from_json(&value.to_string()),
            Err(ConfigError::JsonParse(_))
        ));
    }
}
