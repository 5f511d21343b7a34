//! Wire format for x402-gated actions.
//!
//! # Key Types
//!
//! - [`PaymentTerms`] - What the resource server asks for, sent in every 402 response
//! - [`PaymentRequired`] - The 402 response body
//! - [`PaymentHeaderPayload`] - The caller's signed `X-PAYMENT` envelope
//! - [`VerifyRequest`] / [`VerifyResponse`] - Facilitator `/verify` messages
//! - [`SettleRequest`] / [`SettlementReceipt`] - Facilitator `/settle` messages
//! - [`SupportedResponse`] - Facilitator `/supported` discovery
//!
//! All types serialize with camelCase field names.

use alloy_primitives::{Address, TxHash, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::fmt::Display;
use url::Url;

use crate::util::decimal_u256;

mod payload;

pub use payload::*;

/// Payment scheme. Only `"exact"` is defined.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scheme {
    #[serde(rename = "exact")]
    Exact,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Exact => write!(f, "exact"),
        }
    }
}

/// EIP-712 domain name and version of the asset contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTermsExtra {
    pub name: String,
    pub version: String,
}

/// Requirement for one protected resource.
///
/// Built once from configuration and shared read-only; every 402 response for the
/// resource carries the same terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTerms {
    pub scheme: Scheme,
    /// Network name or CAIP-2 identifier.
    pub network: String,
    /// Minimum acceptable amount, in the asset's smallest unit.
    #[serde(with = "decimal_u256")]
    pub max_amount_required: U256,
    pub resource: Url,
    pub description: String,
    pub mime_type: String,
    /// Payee.
    pub pay_to: Address,
    /// Longest accepted authorization window, in seconds.
    pub max_timeout_seconds: u64,
    /// ERC-3009 token contract.
    pub asset: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<PaymentTermsExtra>,
}

/// Body of a 402 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    pub payment_details: PaymentTerms,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Body of `POST /verify` and `POST /settle`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyRequest {
    /// The `X-PAYMENT` header value, still base64.
    pub payload: String,
    pub details: PaymentTerms,
}

pub type SettleRequest = VerifyRequest;

impl VerifyRequest {
    pub fn new(payload: impl Into<String>, details: PaymentTerms) -> Self {
        Self {
            payload: payload.into(),
            details,
        }
    }

    pub fn decode_payload(&self) -> Result<PaymentHeaderPayload, PaymentHeaderDecodingError> {
        PaymentHeaderPayload::from_header(self.payload.as_bytes())
    }
}

/// Outcome of a verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResponse {
    Valid {
        payer: Address,
    },
    /// `reason` is machine-readable, e.g. `insufficient_amount`.
    Invalid {
        reason: String,
        payer: Option<Address>,
    },
}

impl VerifyResponse {
    pub fn valid(payer: Address) -> Self {
        VerifyResponse::Valid { payer }
    }

    pub fn invalid(payer: Option<Address>, reason: impl Into<String>) -> Self {
        VerifyResponse::Invalid {
            reason: reason.into(),
            payer,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyResponse::Valid { .. })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponseWire {
    is_valid: bool,
    #[serde(default)]
    invalid_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payer: Option<Address>,
}

impl Serialize for VerifyResponse {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let wire = match self {
            VerifyResponse::Valid { payer } => VerifyResponseWire {
                is_valid: true,
                invalid_reason: None,
                payer: Some(*payer),
            },
            VerifyResponse::Invalid { reason, payer } => VerifyResponseWire {
                is_valid: false,
                invalid_reason: Some(reason.clone()),
                payer: *payer,
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VerifyResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = VerifyResponseWire::deserialize(deserializer)?;
        match wire.is_valid {
            true => {
                let payer = wire
                    .payer
                    .ok_or_else(|| serde::de::Error::missing_field("payer"))?;
                Ok(VerifyResponse::Valid { payer })
            }
            false => {
                let reason = wire
                    .invalid_reason
                    .ok_or_else(|| serde::de::Error::missing_field("invalidReason"))?;
                Ok(VerifyResponse::Invalid {
                    reason,
                    payer: wire.payer,
                })
            }
        }
    }
}

/// Outcome of a settlement. The transaction hash exists only on success and the error
/// only on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementReceipt {
    Settled { tx_hash: TxHash },
    Failed { error: String },
}

impl SettlementReceipt {
    pub fn failed(error: impl Into<String>) -> Self {
        SettlementReceipt::Failed {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SettlementReceipt::Settled { .. })
    }

    pub fn tx_hash(&self) -> Option<TxHash> {
        match self {
            SettlementReceipt::Settled { tx_hash } => Some(*tx_hash),
            SettlementReceipt::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            SettlementReceipt::Settled { .. } => None,
            SettlementReceipt::Failed { error } => Some(error),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettlementReceiptWire {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    tx_hash: Option<TxHash>,
}

impl Serialize for SettlementReceipt {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let wire = SettlementReceiptWire {
            success: self.is_success(),
            error: self.error().map(ToOwned::to_owned),
            tx_hash: self.tx_hash(),
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SettlementReceipt {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = SettlementReceiptWire::deserialize(deserializer)?;
        match wire.success {
            true => {
                let tx_hash = wire
                    .tx_hash
                    .ok_or_else(|| serde::de::Error::missing_field("txHash"))?;
                Ok(SettlementReceipt::Settled { tx_hash })
            }
            false => {
                let error = wire
                    .error
                    .ok_or_else(|| serde::de::Error::missing_field("error"))?;
                Ok(SettlementReceipt::Failed { error })
            }
        }
    }
}

/// A payment kind a facilitator can handle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPaymentKind {
    pub x402_version: u8,
    pub scheme: Scheme,
    pub network: String,
}

/// Response of `GET /supported`.
#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedResponse {
    pub kinds: Vec<SupportedPaymentKind>,
    /// Settlement signer addresses, keyed by network.
    #[serde(default)]
    pub signers: HashMap<String, Vec<Address>>,
}

/// Generic JSON error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
