//! Off-chain validation of an `X-PAYMENT` authorization against [`PaymentTerms`].
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. scheme, then network
//! 2. resource
//! 3. `value >= maxAmountRequired`
//! 4. `to == payTo`
//! 5. `validAfter <= now <= validBefore`, and the window is no longer than `maxTimeoutSeconds`
//! 6. the EIP-712 signature recovers to `from`
//!
//! Nothing here touches the network or mutates state. Whether the nonce was already
//! consumed is the ledger's business, see [`crate::ledger::Ledger::is_nonce_used`].

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use x402_types::eip712::{self, Eip712Error};
use x402_types::networks::chain_id_by_network;
use x402_types::proto::{PaymentHeaderPayload, PaymentTerms};
use x402_types::timestamp::UnixTimestamp;

/// Why an authorization was rejected. Serializes as a stable snake_case string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    #[error("scheme_mismatch")]
    SchemeMismatch,
    #[error("network_mismatch")]
    NetworkMismatch,
    #[error("resource_mismatch")]
    ResourceMismatch,
    #[error("insufficient_amount")]
    InsufficientAmount,
    #[error("recipient_mismatch")]
    RecipientMismatch,
    #[error("authorization_not_yet_valid")]
    AuthorizationNotYetValid,
    #[error("authorization_expired")]
    AuthorizationExpired,
    #[error("validity_window_too_long")]
    ValidityWindowTooLong,
    #[error("invalid_signature")]
    InvalidSignature,
    #[error("unsupported_network")]
    UnsupportedNetwork,
    #[error("nonce_already_used")]
    NonceAlreadyUsed,
}

/// Verifies `payload` against `terms` at the current system time.
///
/// Returns the payer on success.
#[cfg_attr(feature = "telemetry", tracing::instrument(skip_all, err, fields(payer = %payload.payer())))]
pub fn verify(
    payload: &PaymentHeaderPayload,
    terms: &PaymentTerms,
) -> Result<Address, InvalidReason> {
    verify_at(payload, terms, UnixTimestamp::now())
}

/// Same as [`verify`] with an explicit clock.
pub fn verify_at(
    payload: &PaymentHeaderPayload,
    terms: &PaymentTerms,
    now: UnixTimestamp,
) -> Result<Address, InvalidReason> {
    if payload.scheme != terms.scheme {
        return Err(InvalidReason::SchemeMismatch);
    }
    if !same_network(&payload.network, &terms.network) {
        return Err(InvalidReason::NetworkMismatch);
    }
    if payload.resource != terms.resource {
        return Err(InvalidReason::ResourceMismatch);
    }
    let authorization = payload.authorization();
    if authorization.value < terms.max_amount_required {
        return Err(InvalidReason::InsufficientAmount);
    }
    if authorization.to != terms.pay_to {
        return Err(InvalidReason::RecipientMismatch);
    }
    if now < authorization.valid_after {
        return Err(InvalidReason::AuthorizationNotYetValid);
    }
    if now > authorization.valid_before {
        return Err(InvalidReason::AuthorizationExpired);
    }
    let window = authorization
        .valid_before
        .seconds_since(authorization.valid_after);
    if window > terms.max_timeout_seconds {
        return Err(InvalidReason::ValidityWindowTooLong);
    }

    let domain = eip712::domain_for(terms).map_err(|e| match e {
        Eip712Error::UnsupportedNetwork(_) => InvalidReason::UnsupportedNetwork,
        Eip712Error::Signature(_) => InvalidReason::InvalidSignature,
    })?;
    let signer = eip712::recover_signer(authorization, &payload.payload.signature, &domain)
        .map_err(|_| InvalidReason::InvalidSignature)?;
    if signer != authorization.from {
        return Err(InvalidReason::InvalidSignature);
    }
    Ok(authorization.from)
}

/// `"base-sepolia"` and `"eip155:84532"` name the same network.
pub fn same_network(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    matches!(
        (chain_id_by_network(a), chain_id_by_network(b)),
        (Some(x), Some(y)) if x == y
    )
}
