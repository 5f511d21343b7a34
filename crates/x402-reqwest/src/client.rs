//! The paying middleware.

use alloy_primitives::{Address, B256, Bytes, Signature, U256};
use http::{Extensions, HeaderValue, StatusCode};
use rand::{Rng, rng};
use reqwest::{Request, Response};
use reqwest_middleware as rqm;
use std::sync::Arc;
use x402_types::eip712::{self, Eip712Error};
use x402_types::proto::{
    ExactEvmPayload, PAYMENT_HEADER_NAME, PaymentAuthorization, PaymentHeaderPayload,
    PaymentRequired, PaymentTerms, X402Version1,
};
use x402_types::timestamp::UnixTimestamp;

#[cfg(feature = "telemetry")]
use tracing::instrument;

/// Anything that can sign a 32-byte hash on behalf of an address.
pub trait SignerLike {
    fn address(&self) -> Address;

    fn sign_hash(
        &self,
        hash: &B256,
    ) -> impl Future<Output = Result<Signature, alloy_signer::Error>> + Send;
}

impl<T> SignerLike for T
where
    T: alloy_signer::Signer + Send + Sync,
{
    fn address(&self) -> Address {
        alloy_signer::Signer::address(self)
    }

    async fn sign_hash(&self, hash: &B256) -> Result<Signature, alloy_signer::Error> {
        alloy_signer::Signer::sign_hash(self, hash).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum X402Error {
    #[error("Invalid 402 response: {0}")]
    ParseError(String),
    #[error("Payment amount {requested} exceeds maximum allowed {allowed}")]
    PaymentAmountTooLarge { requested: U256, allowed: U256 },
    #[error("Cannot sign for these terms: {0}")]
    Eip712(#[from] Eip712Error),
    #[error("Failed to sign payment authorization: {0}")]
    Signing(#[source] alloy_signer::Error),
    #[error("Failed to encode payment header: {0}")]
    Encoding(#[source] serde_json::Error),
    #[error("Failed to encode payment header: {0}")]
    HeaderValue(#[from] http::header::InvalidHeaderValue),
    #[error("Request object is not cloneable. Are you passing a streaming body?")]
    RequestNotCloneable,
    /// The server answered the paid retry with another 402.
    #[error("Payment rejected: {reason}")]
    PaymentRejected { reason: String },
}

impl From<X402Error> for rqm::Error {
    fn from(error: X402Error) -> Self {
        rqm::Error::Middleware(error.into())
    }
}

/// Pays x402 challenges with `signer` and retries once.
pub struct X402Client<S> {
    signer: Arc<S>,
    max_amount: Option<U256>,
}

impl<S> Clone for X402Client<S> {
    fn clone(&self) -> Self {
        Self {
            signer: self.signer.clone(),
            max_amount: self.max_amount,
        }
    }
}

impl<S> X402Client<S> {
    pub fn new(signer: S) -> Self {
        Self {
            signer: Arc::new(signer),
            max_amount: None,
        }
    }

    /// Refuses to pay more than `max` smallest units of any asset.
    pub fn with_max_amount(mut self, max: U256) -> Self {
        self.max_amount = Some(max);
        self
    }

    pub fn max_amount(&self) -> Option<U256> {
        self.max_amount
    }

    pub fn assert_max_amount(&self, terms: &PaymentTerms) -> Result<(), X402Error> {
        match self.max_amount {
            Some(allowed) if terms.max_amount_required > allowed => {
                Err(X402Error::PaymentAmountTooLarge {
                    requested: terms.max_amount_required,
                    allowed,
                })
            }
            _ => Ok(()),
        }
    }
}

impl<S: SignerLike> X402Client<S> {
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Signs an authorization for exactly the advertised amount, valid from now for
    /// `maxTimeoutSeconds`, under a fresh random nonce.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "x402.reqwest.sign_payment", skip_all, err, fields(
            network = %terms.network,
            asset = %terms.asset,
            amount = %terms.max_amount_required,
        ))
    )]
    pub async fn sign_payment(&self, terms: &PaymentTerms) -> Result<PaymentHeaderPayload, X402Error> {
        self.assert_max_amount(terms)?;
        let domain = eip712::domain_for(terms)?;
        let now = UnixTimestamp::now();
        let nonce: [u8; 32] = rng().random();
        let authorization = PaymentAuthorization {
            from: self.signer.address(),
            to: terms.pay_to,
            value: terms.max_amount_required,
            valid_after: now,
            valid_before: now + terms.max_timeout_seconds,
            nonce: B256::from(nonce),
        };
        let hash = eip712::signing_hash(&authorization, &domain);
        let signature = self
            .signer
            .sign_hash(&hash)
            .await
            .map_err(X402Error::Signing)?;
        tracing::debug!(payer = %authorization.from, nonce = %authorization.nonce, "Signed payment authorization");
        Ok(PaymentHeaderPayload {
            x402_version: X402Version1,
            scheme: terms.scheme,
            network: terms.network.clone(),
            payload: ExactEvmPayload {
                signature: Bytes::from(signature.as_bytes().to_vec()),
                authorization,
            },
            resource: terms.resource.clone(),
        })
    }

    pub async fn make_payment_header(&self, terms: &PaymentTerms) -> Result<HeaderValue, X402Error> {
        let payload = self.sign_payment(terms).await?;
        let header = payload.to_header().map_err(X402Error::Encoding)?;
        Ok(HeaderValue::from_bytes(header.as_ref())?)
    }
}

#[async_trait::async_trait]
impl<S> rqm::Middleware for X402Client<S>
where
    S: SignerLike + Send + Sync + 'static,
{
    #[cfg_attr(feature = "telemetry", instrument(name = "x402.reqwest.handle", skip_all, err, fields(url = %req.url())))]
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: rqm::Next<'_>,
    ) -> rqm::Result<Response> {
        let retry_req = req.try_clone();
        let res = next.clone().run(req, extensions).await?;
        if res.status() != StatusCode::PAYMENT_REQUIRED {
            tracing::trace!(status = ?res.status(), "No payment required");
            return Ok(res);
        }

        tracing::info!(url = %res.url(), "Received 402 Payment Required, paying");
        let payment_required = parse_payment_required(res).await?;
        let mut retry = retry_req.ok_or(X402Error::RequestNotCloneable)?;
        let header = self
            .make_payment_header(&payment_required.payment_details)
            .await?;
        retry.headers_mut().insert(PAYMENT_HEADER_NAME, header);

        let res = next.run(retry, extensions).await?;
        if res.status() == StatusCode::PAYMENT_REQUIRED {
            let reason = parse_payment_required(res)
                .await
                .ok()
                .and_then(|p| p.error)
                .unwrap_or_else(|| "payment required".to_string());
            tracing::warn!(%reason, "Paid retry was rejected");
            return Err(X402Error::PaymentRejected { reason }.into());
        }
        Ok(res)
    }
}

/// Reads the `{ paymentDetails, error? }` body of a 402 response.
pub async fn parse_payment_required(response: Response) -> Result<PaymentRequired, X402Error> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| X402Error::ParseError(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| X402Error::ParseError(e.to_string()))
}
