//! The facilitator the resource server verifies and settles through.

use std::time::Duration;
use x402_axum::facilitator_client::{FacilitatorClient, FacilitatorClientError};
use x402_facilitator_local::ledger::{Eip155Ledger, Eip155LedgerSetupError};
use x402_facilitator_local::settler::Settler;
use x402_facilitator_local::{FacilitatorLocal, FacilitatorLocalError};
use x402_types::facilitator::Facilitator;
use x402_types::proto;

use crate::config::FacilitatorConfig;

/// Either an in-process facilitator or a remote one, chosen by configuration.
pub enum FacilitatorBackend {
    Local(FacilitatorLocal<Eip155Ledger>),
    Remote(FacilitatorClient),
}

#[derive(Debug, thiserror::Error)]
pub enum FacilitatorBackendError {
    #[error(transparent)]
    Local(#[from] FacilitatorLocalError),
    #[error(transparent)]
    Remote(#[from] FacilitatorClientError),
}

#[derive(Debug, thiserror::Error)]
pub enum FacilitatorSetupError {
    #[error(transparent)]
    Ledger(#[from] Eip155LedgerSetupError),
    #[error(transparent)]
    Client(#[from] FacilitatorClientError),
}

impl FacilitatorBackend {
    /// Builds the backend for `network`. A local backend settles within `settle_timeout`.
    pub fn from_config(
        network: &str,
        config: &FacilitatorConfig,
        settle_timeout: Duration,
    ) -> Result<Self, FacilitatorSetupError> {
        let backend = match config {
            FacilitatorConfig::Local(local) => {
                let ledger = Eip155Ledger::connect(network, &local.ledger)?;
                let settler = Settler::new(ledger).with_timeout(settle_timeout);
                FacilitatorBackend::Local(FacilitatorLocal::new(network, settler))
            }
            FacilitatorConfig::Remote(remote) => {
                let client = FacilitatorClient::try_new(remote.url.inner().clone())?
                    .with_timeout(Duration::from_secs(remote.timeout_secs));
                tracing::info!(url = %client.base_url(), "Using remote facilitator");
                FacilitatorBackend::Remote(client)
            }
        };
        Ok(backend)
    }
}

impl Facilitator for FacilitatorBackend {
    type Error = FacilitatorBackendError;

    async fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> Result<proto::VerifyResponse, Self::Error> {
        match self {
            FacilitatorBackend::Local(local) => Ok(local.verify(request).await?),
            FacilitatorBackend::Remote(remote) => Ok(remote.verify(request).await?),
        }
    }

    async fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> Result<proto::SettlementReceipt, Self::Error> {
        match self {
            FacilitatorBackend::Local(local) => Ok(local.settle(request).await?),
            FacilitatorBackend::Remote(remote) => Ok(remote.settle(request).await?),
        }
    }

    async fn supported(&self) -> Result<proto::SupportedResponse, Self::Error> {
        match self {
            FacilitatorBackend::Local(local) => Ok(local.supported().await?),
            FacilitatorBackend::Remote(remote) => Ok(remote.supported().await?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteFacilitatorConfig;

    #[test]
    fn remote_backend_from_config() {
        let config = FacilitatorConfig::Remote(RemoteFacilitatorConfig {
            url: serde_json::from_str("\"https://facilitator.x402.rs/\"").unwrap(),
            timeout_secs: 3,
        });
        let backend =
            FacilitatorBackend::from_config("base-sepolia", &config, Duration::from_secs(90))
                .unwrap();
        match backend {
            FacilitatorBackend::Remote(client) => {
                assert_eq!(client.timeout(), &Some(Duration::from_secs(3)));
                assert_eq!(
                    client.verify_url().as_str(),
                    "https://facilitator.x402.rs/verify"
                );
            }
            FacilitatorBackend::Local(_) => panic!("expected a remote backend"),
        }
    }
}
