use alloy_network::EthereumWallet;
use alloy_primitives::{Address, B256, Signature, TxHash, U256};
use alloy_provider::{DynProvider, PendingTransactionError, Provider, ProviderBuilder, WatchTxError};
use alloy_rpc_client::RpcClient;
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::sol;
use alloy_transport::layers::ThrottleLayer;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::Instrument;
use x402_types::config::{EvmPrivateKey, LiteralOrEnv, RpcConfig};
use x402_types::networks::chain_id_by_network;
use x402_types::timestamp::UnixTimestamp;

use super::{ExactEvmPayment, Ledger, LedgerError};

sol! {
    #[allow(missing_docs)]
    #[allow(clippy::too_many_arguments)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IEIP3009 {
        function transferWithAuthorization(
            address from,
            address to,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external;
        function authorizationState(address authorizer, bytes32 nonce) external view returns (bool);
        function balanceOf(address account) external view returns (uint256);
    }
}

/// Settlement signer and RPC endpoint of an [`Eip155Ledger`].
///
/// ```json
/// {
///   "rpc": { "http": "https://sepolia.base.org", "rate_limit": 20 },
///   "signer": "$SETTLEMENT_PRIVATE_KEY",
///   "receiptTimeoutSecs": 30
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip155LedgerConfig {
    pub rpc: RpcConfig,
    pub signer: LiteralOrEnv<EvmPrivateKey>,
    #[serde(default = "eip155_defaults::receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
    #[serde(default = "eip155_defaults::confirmations")]
    pub confirmations: u64,
}

mod eip155_defaults {
    pub fn receipt_timeout_secs() -> u64 {
        30
    }

    pub fn confirmations() -> u64 {
        1
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Eip155LedgerSetupError {
    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),
    #[error("Invalid settlement signer: {0}")]
    Signer(String),
}

/// ERC-3009 token contracts on an EVM chain, settled by a server-owned signer.
///
/// The payer's signature travels as `(v, r, s)` into `transferWithAuthorization`; the
/// server pays gas. The token contract rejects a consumed nonce, so resubmitting an
/// authorization cannot move funds twice.
#[derive(Debug, Clone)]
pub struct Eip155Ledger {
    provider: DynProvider,
    signer: Address,
    confirmations: u64,
    receipt_timeout: Duration,
}

impl Eip155Ledger {
    pub fn connect(
        network: &str,
        config: &Eip155LedgerConfig,
    ) -> Result<Self, Eip155LedgerSetupError> {
        let chain_id = chain_id_by_network(network)
            .ok_or_else(|| Eip155LedgerSetupError::UnsupportedNetwork(network.to_string()))?;
        let signer = PrivateKeySigner::from_bytes(config.signer.as_b256())
            .map_err(|e| Eip155LedgerSetupError::Signer(e.to_string()))?
            .with_chain_id(Some(chain_id));
        let signer_address = signer.address();

        let rate_limit = config.rpc.rate_limit.unwrap_or(u32::MAX);
        let rpc_url = config.rpc.http.inner().clone();
        tracing::info!(%network, %rpc_url, rate_limit, signer = %signer_address, "Using EVM ledger");
        let client = RpcClient::builder()
            .layer(ThrottleLayer::new(rate_limit))
            .http(rpc_url);
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_client(client)
            .erased();

        Ok(Self {
            provider,
            signer: signer_address,
            confirmations: config.confirmations,
            receipt_timeout: Duration::from_secs(config.receipt_timeout_secs),
        })
    }

    fn contract(&self, asset: Address) -> IEIP3009::IEIP3009Instance<DynProvider> {
        IEIP3009::new(asset, self.provider.clone())
    }
}

fn rpc_error(e: impl std::fmt::Display) -> LedgerError {
    LedgerError::Rpc(e.to_string())
}

impl Ledger for Eip155Ledger {
    async fn is_nonce_used(
        &self,
        asset: Address,
        payer: Address,
        nonce: B256,
    ) -> Result<bool, LedgerError> {
        self.contract(asset)
            .authorizationState(payer, nonce)
            .call()
            .into_future()
            .instrument(tracing::info_span!(
                "call_authorizationState",
                token_contract = %asset,
                authorizer = %payer,
                nonce = %nonce,
                otel.kind = "client",
            ))
            .await
            .map_err(rpc_error)
    }

    async fn transfer_with_authorization(
        &self,
        payment: &ExactEvmPayment,
    ) -> Result<TxHash, LedgerError> {
        let authorization = &payment.authorization;
        let now = UnixTimestamp::now();
        if now < authorization.valid_after {
            return Err(LedgerError::AuthorizationNotYetValid);
        }
        if now > authorization.valid_before {
            return Err(LedgerError::AuthorizationExpired);
        }
        if self
            .is_nonce_used(payment.asset, authorization.from, authorization.nonce)
            .await?
        {
            return Err(LedgerError::NonceAlreadyUsed);
        }

        let contract = self.contract(payment.asset);
        let balance = contract
            .balanceOf(authorization.from)
            .call()
            .into_future()
            .instrument(tracing::info_span!(
                "fetch_token_balance",
                token_contract = %payment.asset,
                sender = %authorization.from,
                otel.kind = "client",
            ))
            .await
            .map_err(rpc_error)?;
        if balance < authorization.value {
            return Err(LedgerError::InsufficientBalance);
        }

        let signature =
            Signature::from_raw(&payment.signature).map_err(|_| LedgerError::InvalidSignature)?;
        let v = 27 + signature.v() as u8;
        let r = B256::from(signature.r().to_be_bytes::<32>());
        let s = B256::from(signature.s().to_be_bytes::<32>());

        let call = contract.transferWithAuthorization(
            authorization.from,
            authorization.to,
            authorization.value,
            U256::from(authorization.valid_after.as_secs()),
            U256::from(authorization.valid_before.as_secs()),
            authorization.nonce,
            v,
            r,
            s,
        );
        let pending = call
            .send()
            .instrument(tracing::info_span!(
                "call_transferWithAuthorization",
                from = %authorization.from,
                to = %authorization.to,
                value = %authorization.value,
                valid_after = %authorization.valid_after,
                valid_before = %authorization.valid_before,
                nonce = %authorization.nonce,
                token_contract = %payment.asset,
                otel.kind = "client",
            ))
            .await
            .map_err(rpc_error)?;
        let receipt = pending
            .with_required_confirmations(self.confirmations)
            .with_timeout(Some(self.receipt_timeout))
            .get_receipt()
            .await
            .map_err(|e| match e {
                PendingTransactionError::TxWatcher(WatchTxError::Timeout) => LedgerError::Timeout,
                other => rpc_error(other),
            })?;

        if receipt.status() {
            tracing::info!(status = "ok", tx = %receipt.transaction_hash, "transferWithAuthorization succeeded");
            Ok(receipt.transaction_hash)
        } else {
            tracing::warn!(status = "failed", tx = %receipt.transaction_hash, "transferWithAuthorization reverted");
            Err(LedgerError::Reverted(receipt.transaction_hash))
        }
    }

    fn signer_addresses(&self) -> Vec<Address> {
        vec![self.signer]
    }
}
