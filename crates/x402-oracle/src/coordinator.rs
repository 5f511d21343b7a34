use alloy_primitives::Address;
use std::sync::Arc;

use crate::types::RequestId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    /// The oracle refused the request, e.g. an underfunded subscription.
    #[error("randomness request rejected: {0}")]
    Rejected(String),
    #[error("timed out waiting for the randomness request to be mined")]
    Timeout,
    #[error("request receipt carries no RandomnessRequested event")]
    MissingRequestId,
    #[error("rpc error: {0}")]
    Rpc(String),
}

/// Submits randomness requests to an external oracle.
///
/// The returned id is the key under which the oracle later reports the fulfillment.
pub trait RandomnessCoordinator {
    fn request(
        &self,
        beneficiary: Address,
    ) -> impl Future<Output = Result<RequestId, CoordinatorError>> + Send;
}

impl<T: RandomnessCoordinator> RandomnessCoordinator for Arc<T> {
    fn request(
        &self,
        beneficiary: Address,
    ) -> impl Future<Output = Result<RequestId, CoordinatorError>> + Send {
        self.as_ref().request(beneficiary)
    }
}
