//! Records kept by the bridge and the messages it consumes.

use alloy_primitives::{Address, U256};
use serde::Serialize;
use x402_types::timestamp::UnixTimestamp;
use x402_types::util::decimal_u256;

/// Oracle-assigned request identifier.
pub type RequestId = U256;

/// One gated action, from submission until its fulfillment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatedActionRequest {
    #[serde(with = "decimal_u256")]
    pub request_id: RequestId,
    /// The payer. Cleared once the request is fulfilled.
    pub beneficiary: Option<Address>,
    pub fulfilled: bool,
    pub result: Option<Fulfillment>,
    pub requested_at: UnixTimestamp,
}

impl GatedActionRequest {
    pub fn pending(request_id: RequestId, beneficiary: Address) -> Self {
        Self {
            request_id,
            beneficiary: Some(beneficiary),
            fulfilled: false,
            result: None,
            requested_at: UnixTimestamp::now(),
        }
    }
}

/// What a fulfillment produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Fulfillment {
    #[serde(with = "decimal_u256::seq")]
    pub random_words: Vec<U256>,
    pub outcome_index: usize,
    pub outcome: String,
    pub token_id: u64,
    pub owner: Address,
}

/// A token assigned by a fulfillment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Minted {
    pub request_id: RequestId,
    pub token_id: u64,
    pub owner: Address,
    pub outcome_index: usize,
    pub outcome: String,
}

/// Result of delivering a fulfillment to the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FulfillmentOutcome {
    Applied(Minted),
    /// Already fulfilled; nothing changed.
    Duplicate,
    /// No such request yet. The words are parked and applied once the request is recorded.
    Unknown,
    /// No random words delivered; nothing changed.
    Empty,
}

/// Fulfillment callback as received from the oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfillmentEvent {
    pub request_id: RequestId,
    pub random_words: Vec<U256>,
}
