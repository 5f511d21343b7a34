//! Randomness oracle reached through a consumer contract on an EVM chain.
//!
//! The consumer contract forwards `requestRandomness(beneficiary)` to the oracle and emits
//! `RandomnessRequested` with the assigned id. The oracle later calls back into the
//! consumer, which emits `RandomnessFulfilled`. [`Eip155Coordinator`] submits requests and
//! [`FulfillmentPoller`] watches for fulfillments.

use alloy_network::EthereumWallet;
use alloy_primitives::Address;
use alloy_provider::{DynProvider, PendingTransactionError, Provider, ProviderBuilder, WatchTxError};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::{Filter, Log};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{SolEvent, sol};
use alloy_transport::layers::ThrottleLayer;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use x402_types::config::{EvmPrivateKey, LiteralOrEnv, RpcConfig};
use x402_types::networks::chain_id_by_network;

use crate::coordinator::{CoordinatorError, RandomnessCoordinator};
use crate::types::{FulfillmentEvent, RequestId};

sol! {
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IRandomnessConsumer {
        function requestRandomness(address beneficiary) external returns (uint256 requestId);
        event RandomnessRequested(uint256 indexed requestId, address indexed beneficiary);
        event RandomnessFulfilled(uint256 indexed requestId, uint256[] randomWords);
    }
}

/// ```json
/// {
///   "rpc": { "http": "https://sepolia.base.org" },
///   "signer": "$ORACLE_PRIVATE_KEY",
///   "consumer": "$VRF_CONSUMER_ADDRESS",
///   "pollIntervalMs": 2000,
///   "outcomes": ["common", "rare", "legendary"]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleConfig {
    pub rpc: RpcConfig,
    pub signer: LiteralOrEnv<EvmPrivateKey>,
    pub consumer: LiteralOrEnv<Address>,
    #[serde(default = "oracle_defaults::poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "oracle_defaults::receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
    /// First block to scan for fulfillments; the chain head when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_block: Option<u64>,
    pub outcomes: Vec<String>,
}

mod oracle_defaults {
    pub fn poll_interval_ms() -> u64 {
        2000
    }

    pub fn receipt_timeout_secs() -> u64 {
        60
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OracleSetupError {
    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),
    #[error("Invalid oracle signer: {0}")]
    Signer(String),
}

#[derive(Debug, Clone)]
pub struct Eip155Coordinator {
    provider: DynProvider,
    consumer: Address,
    receipt_timeout: Duration,
    poll_interval: Duration,
    start_block: Option<u64>,
}

impl Eip155Coordinator {
    pub fn connect(network: &str, config: &OracleConfig) -> Result<Self, OracleSetupError> {
        let chain_id = chain_id_by_network(network)
            .ok_or_else(|| OracleSetupError::UnsupportedNetwork(network.to_string()))?;
        let signer = PrivateKeySigner::from_bytes(config.signer.as_b256())
            .map_err(|e| OracleSetupError::Signer(e.to_string()))?
            .with_chain_id(Some(chain_id));

        let consumer = *config.consumer.inner();
        let rate_limit = config.rpc.rate_limit.unwrap_or(u32::MAX);
        let rpc_url = config.rpc.http.inner().clone();
        tracing::info!(%network, %rpc_url, %consumer, requester = %signer.address(), "Using randomness consumer");
        let client = RpcClient::builder()
            .layer(ThrottleLayer::new(rate_limit))
            .http(rpc_url);
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_client(client)
            .erased();

        Ok(Self {
            provider,
            consumer,
            receipt_timeout: Duration::from_secs(config.receipt_timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            start_block: config.start_block,
        })
    }

    pub fn consumer(&self) -> Address {
        self.consumer
    }

    /// A poller over the same consumer contract and RPC connection.
    pub fn poller(&self) -> FulfillmentPoller {
        FulfillmentPoller {
            provider: self.provider.clone(),
            consumer: self.consumer,
            interval: self.poll_interval,
            next_block: self.start_block,
        }
    }
}

impl RandomnessCoordinator for Eip155Coordinator {
    async fn request(&self, beneficiary: Address) -> Result<RequestId, CoordinatorError> {
        let contract = IRandomnessConsumer::new(self.consumer, self.provider.clone());
        let pending = contract
            .requestRandomness(beneficiary)
            .send()
            .instrument(tracing::info_span!(
                "call_requestRandomness",
                consumer = %self.consumer,
                beneficiary = %beneficiary,
                otel.kind = "client",
            ))
            .await
            .map_err(|e| CoordinatorError::Rejected(e.to_string()))?;
        let receipt = pending
            .with_timeout(Some(self.receipt_timeout))
            .get_receipt()
            .await
            .map_err(|e| match e {
                PendingTransactionError::TxWatcher(WatchTxError::Timeout) => CoordinatorError::Timeout,
                other => CoordinatorError::Rpc(other.to_string()),
            })?;
        if !receipt.status() {
            return Err(CoordinatorError::Rejected(format!(
                "transaction {} reverted",
                receipt.transaction_hash
            )));
        }
        receipt
            .inner
            .logs()
            .iter()
            .filter(|log| log.address() == self.consumer)
            .find_map(|log| log.log_decode::<IRandomnessConsumer::RandomnessRequested>().ok())
            .map(|log| log.inner.data.requestId)
            .ok_or(CoordinatorError::MissingRequestId)
    }
}

/// Scans consumer logs for `RandomnessFulfilled` from a block cursor.
#[derive(Debug, Clone)]
pub struct FulfillmentPoller {
    provider: DynProvider,
    consumer: Address,
    interval: Duration,
    next_block: Option<u64>,
}

impl FulfillmentPoller {
    pub fn next_block(&self) -> Option<u64> {
        self.next_block
    }

    /// Polls until cancelled or the receiving side is dropped.
    pub async fn run(mut self, events: mpsc::Sender<FulfillmentEvent>, cancellation_token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    tracing::info!("Fulfillment poller cancelled");
                    return;
                }
                _ = ticker.tick() => {}
            }
            let batch = match self.poll_once().await {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::warn!(error = %e, "Fulfillment poll failed");
                    continue;
                }
            };
            for event in batch {
                if events.send(event).await.is_err() {
                    tracing::info!("Fulfillment receiver dropped, stopping poller");
                    return;
                }
            }
        }
    }

    /// Fetches fulfillments between the cursor and the chain head, then advances the cursor.
    pub async fn poll_once(&mut self) -> Result<Vec<FulfillmentEvent>, CoordinatorError> {
        let head = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| CoordinatorError::Rpc(e.to_string()))?;
        let from = self.next_block.unwrap_or(head);
        if from > head {
            return Ok(Vec::new());
        }
        let filter = Filter::new()
            .address(self.consumer)
            .event_signature(IRandomnessConsumer::RandomnessFulfilled::SIGNATURE_HASH)
            .from_block(from)
            .to_block(head);
        let logs = self
            .provider
            .get_logs(&filter)
            .instrument(tracing::debug_span!("get_fulfillment_logs", from, to = head, otel.kind = "client"))
            .await
            .map_err(|e| CoordinatorError::Rpc(e.to_string()))?;
        self.next_block = Some(head + 1);
        Ok(logs.iter().filter_map(decode_fulfillment).collect())
    }
}

fn decode_fulfillment(log: &Log) -> Option<FulfillmentEvent> {
    match log.log_decode::<IRandomnessConsumer::RandomnessFulfilled>() {
        Ok(decoded) => {
            let data = decoded.inner.data;
            Some(FulfillmentEvent {
                request_id: data.requestId,
                random_words: data.randomWords,
            })
        }
        Err(e) => {
            tracing::warn!(error = %e, "Undecodable RandomnessFulfilled log");
            None
        }
    }
}
