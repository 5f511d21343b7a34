//! In-process [`Facilitator`] over a [`Ledger`].
//!
//! [`FacilitatorLocal`] decodes the `X-PAYMENT` value carried in a
//! [`VerifyRequest`](proto::VerifyRequest), runs the [`verifier`](crate::verifier), asks the
//! ledger whether the nonce is still fresh, and settles through a [`Settler`].
//!
//! ```ignore
//! use x402_facilitator_local::FacilitatorLocal;
//! use x402_facilitator_local::ledger::InMemoryLedger;
//! use x402_facilitator_local::settler::Settler;
//!
//! let facilitator = FacilitatorLocal::new("base-sepolia", Settler::new(InMemoryLedger::new(signer)));
//! let response = facilitator.verify(&verify_request).await?;
//! ```

use std::collections::HashMap;
use x402_types::facilitator::Facilitator;
use x402_types::proto;
use x402_types::proto::{PaymentHeaderDecodingError, Scheme, X402Version1};

use crate::ledger::{ExactEvmPayment, Ledger, LedgerError};
use crate::settler::Settler;
use crate::verifier::{self, InvalidReason, same_network};

/// A [`Facilitator`] that verifies locally and settles against one network's ledger.
pub struct FacilitatorLocal<L> {
    network: String,
    settler: Settler<L>,
}

impl<L> FacilitatorLocal<L> {
    pub fn new(network: impl Into<String>, settler: Settler<L>) -> Self {
        FacilitatorLocal {
            network: network.into(),
            settler,
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn settler(&self) -> &Settler<L> {
        &self.settler
    }

    fn check_network(&self, terms: &proto::PaymentTerms) -> Result<(), InvalidReason> {
        if same_network(&terms.network, &self.network) {
            Ok(())
        } else {
            Err(InvalidReason::UnsupportedNetwork)
        }
    }
}

impl<L> Facilitator for FacilitatorLocal<L>
where
    L: Ledger + Send + Sync,
{
    type Error = FacilitatorLocalError;

    async fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> Result<proto::VerifyResponse, Self::Error> {
        let payload = request.decode_payload()?;
        let terms = &request.details;
        let checked = self
            .check_network(terms)
            .and_then(|_| verifier::verify(&payload, terms));
        let payer = match checked {
            Ok(payer) => payer,
            Err(reason) => {
                tracing::info!(payer = %payload.payer(), %reason, "Payment rejected");
                return Ok(proto::VerifyResponse::invalid(
                    Some(payload.payer()),
                    reason.to_string(),
                ));
            }
        };
        let nonce = payload.authorization().nonce;
        let used = self
            .settler
            .ledger()
            .is_nonce_used(terms.asset, payer, nonce)
            .await?;
        if used {
            tracing::info!(%payer, %nonce, "Payment nonce already used");
            return Ok(proto::VerifyResponse::invalid(
                Some(payer),
                InvalidReason::NonceAlreadyUsed.to_string(),
            ));
        }
        Ok(proto::VerifyResponse::valid(payer))
    }

    async fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> Result<proto::SettlementReceipt, Self::Error> {
        let payload = request.decode_payload()?;
        let terms = &request.details;
        let checked = self
            .check_network(terms)
            .and_then(|_| verifier::verify(&payload, terms));
        if let Err(reason) = checked {
            tracing::warn!(payer = %payload.payer(), %reason, "Refusing to settle an invalid payment");
            return Ok(proto::SettlementReceipt::failed(reason.to_string()));
        }
        let payment = ExactEvmPayment::new(terms.asset, &payload);
        Ok(self.settler.settle(&payment).await)
    }

    async fn supported(&self) -> Result<proto::SupportedResponse, Self::Error> {
        let kinds = vec![proto::SupportedPaymentKind {
            x402_version: X402Version1::VALUE,
            scheme: Scheme::Exact,
            network: self.network.clone(),
        }];
        let signers = HashMap::from([(
            self.network.clone(),
            self.settler.ledger().signer_addresses(),
        )]);
        Ok(proto::SupportedResponse { kinds, signers })
    }
}

/// Failure to reach a verdict.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorLocalError {
    /// The `payload` field is not a valid `X-PAYMENT` value.
    #[error(transparent)]
    Decoding(#[from] PaymentHeaderDecodingError),
    /// The ledger could not be queried.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
