//! The payment gate in front of one gated action.
//!
//! A request moves through these states:
//!
//! ```text
//! NoPayment --------------------------------------------> Challenged        402
//! PaymentPresented (malformed) ------------------------------------------> 400
//! PaymentPresented -> Verifying ------------------------> Rejected          402
//!                      Verifying -> Verified (trigger fails) ------------> 500
//!                                   Verified -> ActionTriggered -> Settling -> Settled           200
//!                                                                  Settling -> SettlementFailed  202
//! ```
//!
//! Verification completes before the action is triggered, and settlement starts only after
//! the trigger succeeded, so a caller is never charged for an action that did not start.
//! Trigger and settlement run in a spawned task that the request awaits: a caller that
//! disconnects mid-request cannot leave a triggered action without a settlement attempt.
//!
//! An authorization is claimed by `(payer, nonce)` after verification and before the
//! trigger. A concurrent request carrying the same authorization is answered with 402
//! `nonce_already_used` and never reaches the action. The claim is released only when the
//! trigger fails. Authorizations that expire before trigger and settlement can complete are
//! rejected up front with `authorization_window_too_short`.
//!
//! A settlement that fails after the trigger is the one inconsistent outcome (action
//! started, payment not collected). It is answered with 202, logged at ERROR with
//! `reconciliation = true`, and appended to the [`ReconciliationLog`].

use alloy_primitives::{Address, B256};
use axum_core::body::Body;
use axum_core::response::{IntoResponse, Response};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};
use serde::Serialize;
use std::fmt;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::Instrument;
use x402_types::action::{ActionReceipt, GatedAction};
use x402_types::facilitator::Facilitator;
use x402_types::proto::{
    ErrorResponse, PAYMENT_HEADER_NAME, PaymentHeaderPayload, PaymentRequired, PaymentTerms,
    SettlementReceipt, VerifyRequest, VerifyResponse,
};
use x402_types::timestamp::UnixTimestamp;

/// `error` of a 402 answering a request without payment.
pub const PAYMENT_HEADER_REQUIRED: &str = "X-PAYMENT header is required";
/// `error` of a 402 when the facilitator failed or did not answer in time.
pub const FACILITATOR_UNAVAILABLE: &str = "facilitator_unavailable";
/// `error` of a 400 answering an undecodable payment header.
pub const INVALID_PAYMENT_HEADER: &str = "invalid_payment_header";
/// `error` of a 500 when the gated action could not be started.
pub const ACTION_FAILED: &str = "action_failed";
/// `error` of a 402 when the same authorization is already being used.
pub const NONCE_ALREADY_USED: &str = "nonce_already_used";
/// `error` of a 402 when the authorization expires too soon to be settled.
pub const AUTHORIZATION_WINDOW_TOO_SHORT: &str = "authorization_window_too_short";
/// Settlement error reported when the facilitator does not settle in time.
pub const SETTLEMENT_TIMEOUT: &str = "settlement-timeout";

pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(90);
pub const DEFAULT_MIN_REMAINING_WINDOW: Duration = Duration::from_secs(30);

/// Claimed entries above which expired ones are pruned.
const CLAIMS_PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    NoPayment,
    Challenged,
    PaymentPresented,
    Verifying,
    Rejected,
    Verified,
    ActionTriggered,
    Settling,
    Settled,
    SettlementFailed,
}

impl Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GateState::NoPayment => "no_payment",
            GateState::Challenged => "challenged",
            GateState::PaymentPresented => "payment_presented",
            GateState::Verifying => "verifying",
            GateState::Rejected => "rejected",
            GateState::Verified => "verified",
            GateState::ActionTriggered => "action_triggered",
            GateState::Settling => "settling",
            GateState::Settled => "settled",
            GateState::SettlementFailed => "settlement_failed",
        };
        f.write_str(s)
    }
}

fn enter(state: GateState) {
    tracing::debug!(%state, "x402.paygate.state");
}

#[derive(Debug, thiserror::Error)]
pub enum PaygateError {
    #[error("{}", PAYMENT_HEADER_REQUIRED)]
    PaymentRequired,
    #[error("invalid payment header: {0}")]
    MalformedHeader(String),
    #[error("payment rejected: {reason}")]
    Rejected {
        reason: String,
        payer: Option<Address>,
    },
    #[error("facilitator unavailable: {0}")]
    FacilitatorUnavailable(String),
    #[error("gated action failed: {0}")]
    Trigger(String),
}

/// Final result of one pass through the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Challenged,
    Malformed {
        details: String,
    },
    Rejected {
        reason: String,
        details: Option<String>,
    },
    TriggerFailed {
        details: String,
    },
    Settled {
        payer: Address,
        receipt: ActionReceipt,
        settlement: SettlementReceipt,
    },
    /// Action triggered but the payment was not collected.
    SettlementFailed {
        payer: Address,
        receipt: ActionReceipt,
        settlement: SettlementReceipt,
    },
}

impl GateOutcome {
    /// The state the request ended in.
    pub fn state(&self) -> GateState {
        match self {
            GateOutcome::Challenged => GateState::Challenged,
            GateOutcome::Malformed { .. } => GateState::PaymentPresented,
            GateOutcome::Rejected { .. } => GateState::Rejected,
            GateOutcome::TriggerFailed { .. } => GateState::Verified,
            GateOutcome::Settled { .. } => GateState::Settled,
            GateOutcome::SettlementFailed { .. } => GateState::SettlementFailed,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GateOutcome::Challenged | GateOutcome::Rejected { .. } => StatusCode::PAYMENT_REQUIRED,
            GateOutcome::Malformed { .. } => StatusCode::BAD_REQUEST,
            GateOutcome::TriggerFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GateOutcome::Settled { .. } => StatusCode::OK,
            GateOutcome::SettlementFailed { .. } => StatusCode::ACCEPTED,
        }
    }

    /// Renders the outcome; 402 bodies carry `terms`.
    pub fn into_response(self, terms: &PaymentTerms) -> Response {
        let status = self.status_code();
        match self {
            GateOutcome::Challenged => json_response(
                status,
                &PaymentRequired {
                    payment_details: terms.clone(),
                    error: Some(PAYMENT_HEADER_REQUIRED.to_string()),
                    details: None,
                },
            ),
            GateOutcome::Rejected { reason, details } => json_response(
                status,
                &PaymentRequired {
                    payment_details: terms.clone(),
                    error: Some(reason),
                    details,
                },
            ),
            GateOutcome::Malformed { details } => json_response(
                status,
                &ErrorResponse {
                    error: INVALID_PAYMENT_HEADER.to_string(),
                    details: Some(details),
                },
            ),
            GateOutcome::TriggerFailed { details } => json_response(
                status,
                &ErrorResponse {
                    error: ACTION_FAILED.to_string(),
                    details: Some(details),
                },
            ),
            GateOutcome::Settled {
                receipt,
                settlement,
                ..
            } => json_response(
                status,
                &GateResponse {
                    message: "Payment settled and action started".to_string(),
                    request_id: receipt.request_id,
                    settlement,
                },
            ),
            GateOutcome::SettlementFailed {
                receipt,
                settlement,
                ..
            } => json_response(
                status,
                &GateResponse {
                    message: "Action started; payment settlement failed and is pending reconciliation"
                        .to_string(),
                    request_id: receipt.request_id,
                    settlement,
                },
            ),
        }
    }
}

impl From<PaygateError> for GateOutcome {
    fn from(err: PaygateError) -> Self {
        match err {
            PaygateError::PaymentRequired => GateOutcome::Challenged,
            PaygateError::MalformedHeader(details) => GateOutcome::Malformed { details },
            PaygateError::Rejected { reason, .. } => GateOutcome::Rejected {
                reason,
                details: None,
            },
            PaygateError::FacilitatorUnavailable(details) => GateOutcome::Rejected {
                reason: FACILITATOR_UNAVAILABLE.to_string(),
                details: Some(details),
            },
            PaygateError::Trigger(details) => GateOutcome::TriggerFailed { details },
        }
    }
}

/// Body of 200 and 202 responses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResponse {
    pub message: String,
    pub request_id: String,
    pub settlement: SettlementReceipt,
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => {
            let mut response = Response::new(Body::from(bytes));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize response body");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// A triggered action whose payment was not collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationEntry {
    pub request_id: String,
    pub payer: Address,
    pub error: String,
    pub recorded_at: UnixTimestamp,
}

/// Append-only record of settlement failures after a successful trigger.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationLog {
    entries: Arc<Mutex<Vec<ReconciliationEntry>>>,
}

impl ReconciliationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, entry: ReconciliationEntry) {
        self.entries.lock().await.push(entry);
    }

    pub async fn entries(&self) -> Vec<ReconciliationEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

/// Authorizations in use, keyed by `(payer, nonce)`.
///
/// A claim lives until its authorization expires, unless the trigger failed and released it.
#[derive(Debug, Clone, Default)]
pub struct NonceClaims {
    inner: Arc<DashMap<(Address, B256), UnixTimestamp>>,
}

impl NonceClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `(payer, nonce)`, or returns `None` if it is already claimed.
    pub fn claim(
        &self,
        payer: Address,
        nonce: B256,
        valid_before: UnixTimestamp,
    ) -> Option<NonceClaim> {
        if self.inner.len() >= CLAIMS_PRUNE_THRESHOLD {
            let now = UnixTimestamp::now();
            self.inner.retain(|_, expires| *expires > now);
        }
        match self.inner.entry((payer, nonce)) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                vacant.insert(valid_before);
                Some(NonceClaim {
                    claims: self.clone(),
                    payer,
                    nonce,
                })
            }
        }
    }

    pub fn release(&self, payer: Address, nonce: B256) {
        self.inner.remove(&(payer, nonce));
    }

    pub fn is_claimed(&self, payer: Address, nonce: B256) -> bool {
        self.inner.contains_key(&(payer, nonce))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// One claimed authorization. Dropping it keeps the claim.
#[derive(Debug)]
pub struct NonceClaim {
    claims: NonceClaims,
    payer: Address,
    nonce: B256,
}

impl NonceClaim {
    pub fn payer(&self) -> Address {
        self.payer
    }

    /// Gives the authorization back, so it may be presented again.
    pub fn release(self) {
        self.claims.release(self.payer, self.nonce);
    }
}

/// Gate for one resource, sharing its terms across requests.
pub struct Paygate<F, A> {
    facilitator: Arc<F>,
    action: Arc<A>,
    terms: Arc<PaymentTerms>,
    verify_timeout: Duration,
    settle_timeout: Duration,
    min_remaining_window: Duration,
    claims: NonceClaims,
    reconciliation: ReconciliationLog,
}

impl<F, A> Clone for Paygate<F, A> {
    fn clone(&self) -> Self {
        Self {
            facilitator: self.facilitator.clone(),
            action: self.action.clone(),
            terms: self.terms.clone(),
            verify_timeout: self.verify_timeout,
            settle_timeout: self.settle_timeout,
            min_remaining_window: self.min_remaining_window,
            claims: self.claims.clone(),
            reconciliation: self.reconciliation.clone(),
        }
    }
}

impl<F, A> Paygate<F, A> {
    pub fn new(facilitator: Arc<F>, action: Arc<A>, terms: PaymentTerms) -> Self {
        Self {
            facilitator,
            action,
            terms: Arc::new(terms),
            verify_timeout: DEFAULT_VERIFY_TIMEOUT,
            settle_timeout: DEFAULT_SETTLE_TIMEOUT,
            min_remaining_window: DEFAULT_MIN_REMAINING_WINDOW,
            claims: NonceClaims::new(),
            reconciliation: ReconciliationLog::new(),
        }
    }

    pub fn with_verify_timeout(mut self, timeout: Duration) -> Self {
        self.verify_timeout = timeout;
        self
    }

    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    /// Shortest validity an authorization must have left to be accepted. It should cover
    /// the trigger and the settlement.
    pub fn with_min_remaining_window(mut self, window: Duration) -> Self {
        self.min_remaining_window = window;
        self
    }

    pub fn with_reconciliation_log(mut self, log: ReconciliationLog) -> Self {
        self.reconciliation = log;
        self
    }

    pub fn terms(&self) -> &PaymentTerms {
        &self.terms
    }

    pub fn facilitator(&self) -> &Arc<F> {
        &self.facilitator
    }

    pub fn action(&self) -> &Arc<A> {
        &self.action
    }

    pub fn reconciliation_log(&self) -> &ReconciliationLog {
        &self.reconciliation
    }

    pub fn nonce_claims(&self) -> &NonceClaims {
        &self.claims
    }

    /// The 402 challenge for a request without payment.
    pub fn challenge(&self) -> Response {
        GateOutcome::Challenged.into_response(&self.terms)
    }
}

impl<F, A> Paygate<F, A>
where
    F: Facilitator + Send + Sync + 'static,
    A: GatedAction + Send + Sync + 'static,
{
    /// Runs the gate for a request with these headers and renders the outcome.
    pub async fn handle(&self, headers: &HeaderMap) -> Response {
        self.evaluate(headers).await.into_response(&self.terms)
    }

    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(name = "x402.paygate", skip_all, fields(resource = %self.terms.resource))
    )]
    pub async fn evaluate(&self, headers: &HeaderMap) -> GateOutcome {
        let outcome = match self.evaluate_fallible(headers).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::info!(error = %err, "Payment gate refused request");
                GateOutcome::from(err)
            }
        };
        enter(outcome.state());
        outcome
    }

    async fn evaluate_fallible(&self, headers: &HeaderMap) -> Result<GateOutcome, PaygateError> {
        enter(GateState::NoPayment);
        let header = headers
            .get(PAYMENT_HEADER_NAME)
            .ok_or(PaygateError::PaymentRequired)?;

        enter(GateState::PaymentPresented);
        let header = header
            .to_str()
            .map_err(|e| PaygateError::MalformedHeader(e.to_string()))?;
        let payload = PaymentHeaderPayload::from_header(header.as_bytes())
            .map_err(|e| PaygateError::MalformedHeader(e.to_string()))?;
        let request = VerifyRequest::new(header, self.terms.as_ref().clone());

        enter(GateState::Verifying);
        let payer = self.verify(&request).await?;

        let authorization = payload.authorization();
        let remaining = authorization.valid_before.seconds_since(UnixTimestamp::now());
        if remaining < self.min_remaining_window.as_secs() {
            tracing::info!(%payer, remaining, "Authorization expires before settlement");
            return Err(PaygateError::Rejected {
                reason: AUTHORIZATION_WINDOW_TOO_SHORT.to_string(),
                payer: Some(payer),
            });
        }
        let nonce = authorization.nonce;
        let Some(claim) = self.claims.claim(payer, nonce, authorization.valid_before) else {
            tracing::info!(%payer, %nonce, "Authorization already in use");
            return Err(PaygateError::Rejected {
                reason: NONCE_ALREADY_USED.to_string(),
                payer: Some(payer),
            });
        };

        enter(GateState::Verified);
        let task = tokio::spawn(
            trigger_and_settle(
                self.facilitator.clone(),
                self.action.clone(),
                request,
                claim,
                self.settle_timeout,
                self.reconciliation.clone(),
            )
            .in_current_span(),
        );
        task.await.map_err(|e| {
            tracing::error!(error = %e, %payer, "Trigger and settlement task aborted");
            PaygateError::Trigger(e.to_string())
        })?
    }

    async fn verify(&self, request: &VerifyRequest) -> Result<Address, PaygateError> {
        let verdict = tokio::time::timeout(self.verify_timeout, self.facilitator.verify(request))
            .await
            .map_err(|_| PaygateError::FacilitatorUnavailable("verification timed out".to_string()))?
            .map_err(|e| PaygateError::FacilitatorUnavailable(e.to_string()))?;
        match verdict {
            VerifyResponse::Valid { payer } => Ok(payer),
            VerifyResponse::Invalid { reason, payer } => {
                Err(PaygateError::Rejected { reason, payer })
            }
        }
    }
}

async fn trigger_and_settle<F, A>(
    facilitator: Arc<F>,
    action: Arc<A>,
    request: VerifyRequest,
    claim: NonceClaim,
    settle_timeout: Duration,
    reconciliation: ReconciliationLog,
) -> Result<GateOutcome, PaygateError>
where
    F: Facilitator,
    A: GatedAction,
{
    let payer = claim.payer();
    let receipt = match action.trigger(payer).await {
        Ok(receipt) => receipt,
        Err(e) => {
            tracing::warn!(error = %e, %payer, "Gated action was not started");
            claim.release();
            return Err(PaygateError::Trigger(e.to_string()));
        }
    };
    enter(GateState::ActionTriggered);
    tracing::info!(request_id = %receipt.request_id, %payer, "Gated action started");

    enter(GateState::Settling);
    let settlement = match tokio::time::timeout(settle_timeout, facilitator.settle(&request)).await {
        Ok(Ok(settlement)) => settlement,
        Ok(Err(e)) => SettlementReceipt::failed(e.to_string()),
        Err(_) => SettlementReceipt::failed(SETTLEMENT_TIMEOUT),
    };

    match &settlement {
        SettlementReceipt::Settled { tx_hash } => {
            tracing::info!(request_id = %receipt.request_id, %payer, %tx_hash, "Payment settled");
            Ok(GateOutcome::Settled {
                payer,
                receipt,
                settlement,
            })
        }
        SettlementReceipt::Failed { error } => {
            tracing::error!(
                reconciliation = true,
                request_id = %receipt.request_id,
                %payer,
                error = %error,
                "Payment settlement failed after the action started"
            );
            reconciliation
                .record(ReconciliationEntry {
                    request_id: receipt.request_id.clone(),
                    payer,
                    error: error.clone(),
                    recorded_at: UnixTimestamp::now(),
                })
                .await;
            Ok(GateOutcome::SettlementFailed {
                payer,
                receipt,
                settlement,
            })
        }
    }
}
