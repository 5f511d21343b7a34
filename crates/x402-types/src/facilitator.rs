//! The verification and settlement interface of an x402 facilitator.
//!
//! A facilitator checks a payment authorization against [`PaymentTerms`](crate::proto::PaymentTerms)
//! with [`Facilitator::verify`] and executes the transfer with [`Facilitator::settle`]. The
//! resource server talks to it either in-process or over HTTP; both sides implement this trait.

use std::fmt::{Debug, Display};
use std::sync::Arc;

use crate::proto;

/// Asynchronous interface of an x402 facilitator.
pub trait Facilitator {
    /// Failure to reach a verdict, as opposed to a negative verdict.
    type Error: Debug + Display + Send;

    /// Checks a payment authorization without moving any funds.
    ///
    /// An authorization that fails a check is an `Ok` [`proto::VerifyResponse::Invalid`]
    /// carrying a machine-readable reason. `Err` means the facilitator could not decide,
    /// e.g. the remote service was unreachable.
    fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> impl Future<Output = Result<proto::VerifyResponse, Self::Error>> + Send;

    /// Submits the transfer and waits for it to become final.
    ///
    /// Implementations re-validate the authorization and never transfer a payment that
    /// would fail [`Facilitator::verify`]. A rejected or timed-out transfer is an `Ok`
    /// [`proto::SettlementReceipt::Failed`].
    fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> impl Future<Output = Result<proto::SettlementReceipt, Self::Error>> + Send;

    fn supported(
        &self,
    ) -> impl Future<Output = Result<proto::SupportedResponse, Self::Error>> + Send;
}

impl<T: Facilitator> Facilitator for Arc<T> {
    type Error = T::Error;

    fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> impl Future<Output = Result<proto::VerifyResponse, Self::Error>> + Send {
        self.as_ref().verify(request)
    }

    fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> impl Future<Output = Result<proto::SettlementReceipt, Self::Error>> + Send {
        self.as_ref().settle(request)
    }

    fn supported(
        &self,
    ) -> impl Future<Output = Result<proto::SupportedResponse, Self::Error>> + Send {
        self.as_ref().supported()
    }
}
