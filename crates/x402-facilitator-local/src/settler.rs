//! Bounded-time settlement.

use std::time::Duration;
use x402_types::proto::SettlementReceipt;

use crate::ledger::{ExactEvmPayment, Ledger};

pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Receipt error when the ledger does not report finality in time.
pub const SETTLEMENT_TIMEOUT: &str = "settlement-timeout";

/// Submits verified payments to a [`Ledger`] and waits, at most `timeout`, for finality.
///
/// A timeout is a failure, never a success. Retrying reuses the same authorization and
/// therefore the same nonce, so the ledger moves funds at most once.
#[derive(Debug, Clone)]
pub struct Settler<L> {
    ledger: L,
    timeout: Duration,
}

impl<L> Settler<L> {
    pub fn new(ledger: L) -> Self {
        Self {
            ledger,
            timeout: DEFAULT_SETTLE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }
}

impl<L: Ledger> Settler<L> {
    #[cfg_attr(feature = "telemetry", tracing::instrument(skip_all, fields(payer = %payment.payer(), nonce = %payment.nonce())))]
    pub async fn settle(&self, payment: &ExactEvmPayment) -> SettlementReceipt {
        let transfer = self.ledger.transfer_with_authorization(payment);
        match tokio::time::timeout(self.timeout, transfer).await {
            Ok(Ok(tx_hash)) => {
                tracing::info!(payer = %payment.payer(), tx = %tx_hash, "Payment settled");
                SettlementReceipt::Settled { tx_hash }
            }
            Ok(Err(error)) => {
                tracing::warn!(payer = %payment.payer(), %error, "Ledger rejected settlement");
                SettlementReceipt::failed(error.to_string())
            }
            Err(_) => {
                tracing::warn!(payer = %payment.payer(), timeout = ?self.timeout, "Settlement timed out");
                SettlementReceipt::failed(SETTLEMENT_TIMEOUT)
            }
        }
    }
}
