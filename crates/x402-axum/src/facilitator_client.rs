//! A [`Facilitator`] reached over HTTP.
//!
//! [`FacilitatorClient`] posts to the `/verify` and `/settle` endpoints of a remote
//! facilitator and reads `/supported`, so a resource server can delegate verification and
//! settlement instead of holding a settlement key itself.
//!
//! ```rust
//! use std::time::Duration;
//! use x402_axum::facilitator_client::FacilitatorClient;
//!
//! let facilitator = FacilitatorClient::try_from("https://facilitator.example.com")
//!     .unwrap()
//!     .with_timeout(Duration::from_secs(10));
//! assert_eq!(facilitator.verify_url().as_str(), "https://facilitator.example.com/verify");
//! ```
//!
//! Failures are typed: URL construction, transport, JSON decoding, non-200 statuses, and
//! unreadable bodies each have their own [`FacilitatorClientError`] variant. A negative
//! verdict is not an error; it comes back as an `Ok` [`VerifyResponse::Invalid`].

use http::{HeaderMap, StatusCode};
use reqwest::Client;
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::RwLock;
use url::Url;
use x402_types::facilitator::Facilitator;
use x402_types::proto::{
    SettleRequest, SettlementReceipt, SupportedResponse, VerifyRequest, VerifyResponse,
};

#[cfg(feature = "telemetry")]
use tracing::instrument;

/// A cached `/supported` response and its deadline.
#[derive(Clone, Debug)]
struct SupportedCacheState {
    response: SupportedResponse,
    /// Past this instant the response is refetched.
    expires_at: std::time::Instant,
}

/// TTL cache for the `/supported` response.
///
/// Each clone starts empty.
#[derive(Debug)]
pub struct SupportedCache {
    /// How long a fetched response stays fresh.
    ttl: Duration,
    /// Read far more often than written.
    state: RwLock<Option<SupportedCacheState>>,
}

impl SupportedCache {
    /// An empty cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: RwLock::new(None),
        }
    }

    /// The cached response, if still fresh.
    pub async fn get(&self) -> Option<SupportedResponse> {
        let guard = self.state.read().await;
        let cache = guard.as_ref()?;
        if std::time::Instant::now() < cache.expires_at {
            Some(cache.response.clone())
        } else {
            None
        }
    }

    /// Stores `response`, fresh for one TTL from now.
    pub async fn set(&self, response: SupportedResponse) {
        let mut guard = self.state.write().await;
        *guard = Some(SupportedCacheState {
            response,
            expires_at: std::time::Instant::now() + self.ttl,
        });
    }

    /// Drops the cached response.
    pub async fn clear(&self) {
        let mut guard = self.state.write().await;
        *guard = None;
    }
}

impl Clone for SupportedCache {
    fn clone(&self) -> Self {
        Self::new(self.ttl)
    }
}

/// HTTP client for a remote x402 facilitator.
///
/// Speaks JSON to `/verify`, `/settle` and `/supported`.
#[derive(Clone, Debug)]
pub struct FacilitatorClient {
    /// Facilitator root, always ending in `/`.
    base_url: Url,
    /// `POST /verify` endpoint.
    verify_url: Url,
    /// `POST /settle` endpoint.
    settle_url: Url,
    /// `GET /supported` endpoint.
    supported_url: Url,
    /// Shared connection pool.
    client: Client,
    /// Sent with every request, e.g. an API key.
    headers: HeaderMap,
    /// Per-request bound; none by default.
    timeout: Option<Duration>,
    /// Cache for `/supported`.
    supported_cache: SupportedCache,
}

impl Facilitator for FacilitatorClient {
    type Error = FacilitatorClientError;

    /// Asks the remote facilitator whether the payment is acceptable.
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        FacilitatorClient::verify(self, request).await
    }

    /// Asks the remote facilitator to execute the transfer.
    async fn settle(&self, request: &SettleRequest) -> Result<SettlementReceipt, Self::Error> {
        FacilitatorClient::settle(self, request).await
    }

    /// Payment kinds the remote facilitator handles, served from the TTL cache when fresh.
    async fn supported(&self) -> Result<SupportedResponse, Self::Error> {
        FacilitatorClient::supported(self).await
    }
}

/// Failures talking to a remote facilitator.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorClientError {
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        context: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("HTTP error: {context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        context: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl FacilitatorClientError {
    /// Whether the facilitator could not be reached in time.
    pub fn is_timeout(&self) -> bool {
        match self {
            FacilitatorClientError::Http { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

impl FacilitatorClient {
    /// `/supported` responses are reused for ten minutes unless configured otherwise.
    pub const DEFAULT_SUPPORTED_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

    /// The facilitator root every endpoint is joined to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `./verify` under [`FacilitatorClient::base_url`].
    pub fn verify_url(&self) -> &Url {
        &self.verify_url
    }

    /// `./settle` under [`FacilitatorClient::base_url`].
    pub fn settle_url(&self) -> &Url {
        &self.settle_url
    }

    /// `./supported` under [`FacilitatorClient::base_url`].
    pub fn supported_url(&self) -> &Url {
        &self.supported_url
    }

    /// Extra headers attached to every request.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The per-request timeout, if one was set.
    pub fn timeout(&self) -> &Option<Duration> {
        &self.timeout
    }

    /// The `/supported` cache of this client.
    pub fn supported_cache(&self) -> &SupportedCache {
        &self.supported_cache
    }

    /// Builds the endpoint URLs relative to `base_url`.
    pub fn try_new(base_url: Url) -> Result<Self, FacilitatorClientError> {
        let join = |path: &str, context: &'static str| {
            base_url
                .join(path)
                .map_err(|source| FacilitatorClientError::UrlParse { context, source })
        };
        let verify_url = join("./verify", "Failed to construct ./verify URL")?;
        let settle_url = join("./settle", "Failed to construct ./settle URL")?;
        let supported_url = join("./supported", "Failed to construct ./supported URL")?;
        Ok(Self {
            client: Client::new(),
            base_url,
            verify_url,
            settle_url,
            supported_url,
            headers: HeaderMap::new(),
            timeout: None,
            supported_cache: SupportedCache::new(Self::DEFAULT_SUPPORTED_CACHE_TTL),
        })
    }

    /// A copy of this client that sends `headers` with every request.
    pub fn with_headers(&self, headers: HeaderMap) -> Self {
        let mut this = self.clone();
        this.headers = headers;
        this
    }

    /// Bounds every request, connection included.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut this = self.clone();
        this.timeout = Some(timeout);
        this
    }

    /// A copy of this client whose `/supported` cache keeps entries for `ttl`.
    ///
    /// See [`Self::without_supported_cache`] to turn caching off.
    pub fn with_supported_cache_ttl(&self, ttl: Duration) -> Self {
        let mut this = self.clone();
        this.supported_cache = SupportedCache::new(ttl);
        this
    }

    /// A copy of this client that fetches `/supported` on every call.
    pub fn without_supported_cache(&self) -> Self {
        self.with_supported_cache_ttl(Duration::ZERO)
    }

    /// `POST /verify` with the payment and its terms.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "x402.facilitator_client.verify", skip_all, err)
    )]
    pub async fn verify(
        &self,
        request: &VerifyRequest,
    ) -> Result<VerifyResponse, FacilitatorClientError> {
        self.post_json(&self.verify_url, "POST /verify", request)
            .await
    }

    /// `POST /settle` with the payment and its terms.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "x402.facilitator_client.settle", skip_all, err)
    )]
    pub async fn settle(
        &self,
        request: &SettleRequest,
    ) -> Result<SettlementReceipt, FacilitatorClientError> {
        self.post_json(&self.settle_url, "POST /settle", request)
            .await
    }

    /// `GET /supported`, bypassing the cache.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "x402.facilitator_client.supported", skip_all, err)
    )]
    async fn supported_inner(&self) -> Result<SupportedResponse, FacilitatorClientError> {
        self.get_json(&self.supported_url, "GET /supported").await
    }

    /// `GET /supported`, answered from the cache while it is fresh.
    pub async fn supported(&self) -> Result<SupportedResponse, FacilitatorClientError> {
        if let Some(response) = self.supported_cache.get().await {
            return Ok(response);
        }
        tracing::debug!("x402.facilitator_client.supported_cache_miss");
        let response = self.supported_inner().await?;
        self.supported_cache.set(response.clone()).await;
        Ok(response)
    }

    async fn post_json<T, R>(
        &self,
        url: &Url,
        context: &'static str,
        payload: &T,
    ) -> Result<R, FacilitatorClientError>
    where
        T: serde::Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let req = self.client.post(url.clone()).json(payload);
        self.send(req, context).await
    }

    async fn get_json<R>(&self, url: &Url, context: &'static str) -> Result<R, FacilitatorClientError>
    where
        R: serde::de::DeserializeOwned,
    {
        let req = self.client.get(url.clone());
        self.send(req, context).await
    }

    /// Applies headers and timeout, sends, and maps the response.
    async fn send<R>(
        &self,
        mut req: reqwest::RequestBuilder,
        context: &'static str,
    ) -> Result<R, FacilitatorClientError>
    where
        R: serde::de::DeserializeOwned,
    {
        for (key, value) in self.headers.iter() {
            req = req.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req
            .send()
            .await
            .map_err(|e| FacilitatorClientError::Http { context, source: e })?;

        let result = if http_response.status() == StatusCode::OK {
            http_response
                .json::<R>()
                .await
                .map_err(|e| FacilitatorClientError::JsonDeserialization { context, source: e })
        } else {
            let status = http_response.status();
            let body = http_response
                .text()
                .await
                .map_err(|e| FacilitatorClientError::ResponseBodyRead { context, source: e })?;
            Err(FacilitatorClientError::HttpStatus {
                context,
                status,
                body,
            })
        };

        record_result(&result);
        result
    }
}

impl TryFrom<&str> for FacilitatorClient {
    type Error = FacilitatorClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        // Exactly one trailing slash, so joins stay under the base path.
        let mut normalized = value.trim_end_matches('/').to_string();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| FacilitatorClientError::UrlParse {
            context: "Failed to parse base url",
            source: e,
        })?;
        FacilitatorClient::try_new(url)
    }
}

impl TryFrom<String> for FacilitatorClient {
    type Error = FacilitatorClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        FacilitatorClient::try_from(value.as_str())
    }
}

#[cfg(feature = "telemetry")]
fn record_result<R, E: Display>(result: &Result<R, E>) {
    let span = tracing::Span::current();
    match result {
        Ok(_) => {
            span.record("otel.status_code", "OK");
        }
        Err(err) => {
            span.record("otel.status_code", "ERROR");
            span.record("error.message", tracing::field::display(err));
            tracing::error!(error = %err, "Request to facilitator failed");
        }
    }
}

#[cfg(not(feature = "telemetry"))]
fn record_result<R, E: Display>(result: &Result<R, E>) {
    if let Err(err) = result {
        tracing::error!(error = %err, "Request to facilitator failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256};
    use serde_json::json;
    use std::collections::HashMap;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use x402_types::proto::{PaymentTerms, Scheme, SupportedPaymentKind};

    fn supported_response() -> SupportedResponse {
        SupportedResponse {
            kinds: vec![SupportedPaymentKind {
                x402_version: 1,
                scheme: Scheme::Exact,
                network: "base-sepolia".to_string(),
            }],
            signers: HashMap::new(),
        }
    }

    fn request() -> VerifyRequest {
        let terms: PaymentTerms = serde_json::from_value(json!({
            "scheme": "exact",
            "network": "base-sepolia",
            "maxAmountRequired": "50000",
            "resource": "https://api.example.com/mint",
            "description": "",
            "mimeType": "application/json",
            "payTo": "0x2222222222222222222222222222222222222222",
            "maxTimeoutSeconds": 60,
            "asset": "0x036CbD53842c5426634e7929541eC2318f3dCF7e"
        }))
        .unwrap();
        VerifyRequest::new("eyJ4NDAyVmVyc2lvbiI6MX0=", terms)
    }

    async fn client_for(server: &MockServer) -> FacilitatorClient {
        FacilitatorClient::try_from(server.uri()).unwrap()
    }

    #[test]
    fn joins_endpoint_urls_under_base_path() {
        let client = FacilitatorClient::try_from("https://example.com/x402//").unwrap();
        assert_eq!(client.verify_url().as_str(), "https://example.com/x402/verify");
        assert_eq!(client.settle_url().as_str(), "https://example.com/x402/settle");
        assert_eq!(
            client.supported_url().as_str(),
            "https://example.com/x402/supported"
        );
        assert!(matches!(
            FacilitatorClient::try_from("not a url"),
            Err(FacilitatorClientError::UrlParse { .. })
        ));
    }

    #[test]
    fn builder_settings_are_visible_through_accessors() {
        let client = FacilitatorClient::try_from("https://example.com/x402").unwrap();
        assert_eq!(client.base_url().as_str(), "https://example.com/x402/");
        assert_eq!(client.timeout(), &None);
        assert!(client.headers().is_empty());

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "k".parse().unwrap());
        let configured = client
            .with_headers(headers)
            .with_timeout(Duration::from_secs(3));
        assert_eq!(configured.timeout(), &Some(Duration::from_secs(3)));
        assert_eq!(configured.headers().get("x-api-key").unwrap(), "k");
        assert_eq!(configured.base_url(), client.base_url());
    }

    #[tokio::test]
    async fn verify_maps_invalid_verdict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .and(body_partial_json(json!({ "payload": "eyJ4NDAyVmVyc2lvbiI6MX0=" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "isValid": false,
                "invalidReason": "insufficient_amount",
                "payer": "0x1111111111111111111111111111111111111111"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = client_for(&server).await.verify(&request()).await.unwrap();
        assert_eq!(
            response,
            VerifyResponse::invalid(
                Some("0x1111111111111111111111111111111111111111".parse::<Address>().unwrap()),
                "insufficient_amount"
            )
        );
    }

    #[tokio::test]
    async fn settle_maps_receipt() {
        let server = MockServer::start().await;
        let tx_hash = B256::repeat_byte(0xcd);
        Mock::given(method("POST"))
            .and(path("/settle"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "error": null,
                "txHash": tx_hash
            })))
            .mount(&server)
            .await;

        let receipt = client_for(&server).await.settle(&request()).await.unwrap();
        assert_eq!(receipt.tx_hash(), Some(tx_hash));
    }

    #[tokio::test]
    async fn non_200_is_http_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(502).set_body_string("ledger down"))
            .mount(&server)
            .await;

        let err = client_for(&server).await.verify(&request()).await.unwrap_err();
        match err {
            FacilitatorClientError::HttpStatus { status, body, .. } => {
                assert_eq!(status, StatusCode::BAD_GATEWAY);
                assert_eq!(body, "ledger down");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn garbage_body_is_json_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client_for(&server).await.verify(&request()).await.unwrap_err();
        assert!(matches!(err, FacilitatorClientError::JsonDeserialization { .. }));
    }

    #[tokio::test]
    async fn slow_facilitator_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "isValid": true, "invalidReason": null, "payer": Address::ZERO }))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let client = client_for(&server)
            .await
            .with_timeout(Duration::from_millis(100));
        let err = client.verify(&request()).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn custom_headers_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/supported"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(supported_response()))
            .expect(1)
            .mount(&server)
            .await;

        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer secret".parse().unwrap());
        let client = client_for(&server).await.with_headers(headers);
        assert_eq!(client.supported().await.unwrap(), supported_response());
    }

    #[tokio::test]
    async fn supported_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/supported"))
            .respond_with(ResponseTemplate::new(200).set_body_json(supported_response()))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let first = client.supported().await.unwrap();
        let second = client.supported().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn supported_cache_expires() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/supported"))
            .respond_with(ResponseTemplate::new(200).set_body_json(supported_response()))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server)
            .await
            .with_supported_cache_ttl(Duration::from_millis(1));
        client.supported().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.supported().await.unwrap();
    }

    #[tokio::test]
    async fn supported_cache_disabled_and_cleared() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/supported"))
            .respond_with(ResponseTemplate::new(200).set_body_json(supported_response()))
            .expect(3)
            .mount(&server)
            .await;

        let uncached = client_for(&server).await.without_supported_cache();
        uncached.supported().await.unwrap();
        uncached.supported().await.unwrap();

        let cached = client_for(&server).await;
        cached.supported().await.unwrap();
        cached.supported_cache().clear().await;
        assert!(cached.supported_cache().get().await.is_none());
    }
}
