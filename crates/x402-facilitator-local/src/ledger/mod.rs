//! The token ledger a facilitator settles against.
//!
//! A [`Ledger`] executes ERC-3009 `transferWithAuthorization` and answers whether an
//! authorization nonce was already consumed. Nonce uniqueness is the ledger's guarantee:
//! presenting the same authorization twice moves funds at most once.
//!
//! - [`Eip155Ledger`] talks to a real token contract over JSON-RPC.
//! - [`InMemoryLedger`] keeps balances and used nonces in memory, for development and tests.

use alloy_primitives::{Address, B256, Bytes, TxHash};
use std::sync::Arc;
use x402_types::proto::{PaymentAuthorization, PaymentHeaderPayload};

mod eip155;
mod memory;

pub use eip155::*;
pub use memory::*;

/// A verified authorization, bound to the asset it moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExactEvmPayment {
    pub asset: Address,
    pub authorization: PaymentAuthorization,
    /// 65-byte `r || s || v`.
    pub signature: Bytes,
}

impl ExactEvmPayment {
    pub fn new(asset: Address, payload: &PaymentHeaderPayload) -> Self {
        Self {
            asset,
            authorization: payload.payload.authorization,
            signature: payload.payload.signature.clone(),
        }
    }

    pub fn payer(&self) -> Address {
        self.authorization.from
    }

    pub fn nonce(&self) -> B256 {
        self.authorization.nonce
    }
}

/// Rejection reported by the ledger. The `Display` form ends up verbatim in
/// failed settlement receipts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("nonce_already_used")]
    NonceAlreadyUsed,
    #[error("insufficient_balance")]
    InsufficientBalance,
    #[error("authorization_expired")]
    AuthorizationExpired,
    #[error("authorization_not_yet_valid")]
    AuthorizationNotYetValid,
    #[error("invalid_signature")]
    InvalidSignature,
    #[error("transaction {0} reverted")]
    Reverted(TxHash),
    #[error("settlement-timeout")]
    Timeout,
    #[error("rpc error: {0}")]
    Rpc(String),
}

pub trait Ledger {
    /// Whether `payer` already consumed `nonce` on `asset`.
    fn is_nonce_used(
        &self,
        asset: Address,
        payer: Address,
        nonce: B256,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    /// Executes the transfer and waits until the ledger considers it final.
    fn transfer_with_authorization(
        &self,
        payment: &ExactEvmPayment,
    ) -> impl Future<Output = Result<TxHash, LedgerError>> + Send;

    /// Accounts that submit settlement transactions.
    fn signer_addresses(&self) -> Vec<Address>;
}

impl<T: Ledger> Ledger for Arc<T> {
    fn is_nonce_used(
        &self,
        asset: Address,
        payer: Address,
        nonce: B256,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send {
        self.as_ref().is_nonce_used(asset, payer, nonce)
    }

    fn transfer_with_authorization(
        &self,
        payment: &ExactEvmPayment,
    ) -> impl Future<Output = Result<TxHash, LedgerError>> + Send {
        self.as_ref().transfer_with_authorization(payment)
    }

    fn signer_addresses(&self) -> Vec<Address> {
        self.as_ref().signer_addresses()
    }
}
