//! The paid action a resource server performs once a payment verifies.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::sync::Arc;

/// Handle to a triggered action whose result arrives later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionReceipt {
    pub request_id: String,
}

/// An action gated behind a payment.
///
/// `trigger` runs only after the payment verified, and settlement runs only after
/// `trigger` succeeded.
pub trait GatedAction {
    type Error: Debug + Display + Send;

    /// Starts the action on behalf of `beneficiary`, the verified payer.
    fn trigger(
        &self,
        beneficiary: Address,
    ) -> impl Future<Output = Result<ActionReceipt, Self::Error>> + Send;
}

impl<T: GatedAction> GatedAction for Arc<T> {
    type Error = T::Error;

    fn trigger(
        &self,
        beneficiary: Address,
    ) -> impl Future<Output = Result<ActionReceipt, Self::Error>> + Send {
        self.as_ref().trigger(beneficiary)
    }
}
