//! `/mint` end to end: payment gate, in-process facilitator over an in-memory ledger, and
//! the oracle bridge over a scripted coordinator.

use alloy_primitives::{Address, B256, TxHash, U256, address};
use alloy_signer_local::PrivateKeySigner;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use x402_axum::{Paygate, ReconciliationLog};
use x402_facilitator_local::FacilitatorLocal;
use x402_facilitator_local::ledger::{ExactEvmPayment, InMemoryLedger, Ledger, LedgerError};
use x402_facilitator_local::settler::Settler;
use x402_oracle::{
    CoordinatorError, FulfillmentEvent, FulfillmentOutcome, OracleBridge, RandomnessCoordinator,
    RequestId,
};
use x402_reqwest::{ReqwestWithPayments, ReqwestWithPaymentsBuild, X402Client};
use x402_types::proto::{PAYMENT_HEADER_NAME, PaymentRequired, PaymentTerms, PaymentTermsExtra, Scheme};
use x402_vrf::routes;

const ASSET: Address = address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e");
const PAY_TO: Address = address!("0x2222222222222222222222222222222222222222");
const SETTLEMENT_SIGNER: Address = address!("0x9999999999999999999999999999999999999999");
const FIRST_REQUEST_ID: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    NonceCheck,
    Trigger,
    Transfer,
}

type CallLog = Arc<Mutex<Vec<Call>>>;

/// In-memory ledger that records which operations the facilitator performed.
struct RecordingLedger {
    inner: Arc<InMemoryLedger>,
    calls: CallLog,
}

impl Ledger for RecordingLedger {
    async fn is_nonce_used(
        &self,
        asset: Address,
        payer: Address,
        nonce: B256,
    ) -> Result<bool, LedgerError> {
        self.calls.lock().unwrap().push(Call::NonceCheck);
        self.inner.is_nonce_used(asset, payer, nonce).await
    }

    async fn transfer_with_authorization(
        &self,
        payment: &ExactEvmPayment,
    ) -> Result<TxHash, LedgerError> {
        self.calls.lock().unwrap().push(Call::Transfer);
        self.inner.transfer_with_authorization(payment).await
    }

    fn signer_addresses(&self) -> Vec<Address> {
        self.inner.signer_addresses()
    }
}

/// Hands out sequential request ids after `delay`, or refuses every submission.
struct ScriptedCoordinator {
    next: AtomicU64,
    refuse: bool,
    delay: Duration,
    calls: CallLog,
}

impl RandomnessCoordinator for ScriptedCoordinator {
    async fn request(&self, _beneficiary: Address) -> Result<RequestId, CoordinatorError> {
        self.calls.lock().unwrap().push(Call::Trigger);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.refuse {
            return Err(CoordinatorError::Rejected("oracle subscription has no funds".to_string()));
        }
        Ok(U256::from(self.next.fetch_add(1, Ordering::SeqCst)))
    }
}

struct Options {
    balance: U256,
    refuse_trigger: bool,
    trigger_delay: Duration,
    min_remaining_window: Option<Duration>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            balance: U256::from(1_000_000u64),
            refuse_trigger: false,
            trigger_delay: Duration::ZERO,
            min_remaining_window: None,
        }
    }
}

struct Harness {
    app: Router,
    terms: PaymentTerms,
    ledger: Arc<InMemoryLedger>,
    bridge: Arc<OracleBridge<ScriptedCoordinator>>,
    reconciliation: ReconciliationLog,
    calls: CallLog,
    payer: PrivateKeySigner,
}

impl Harness {
    fn new(refuse_trigger: bool) -> Self {
        Self::with_options(Options {
            refuse_trigger,
            ..Options::default()
        })
    }

    fn with_options(options: Options) -> Self {
        let payer = PrivateKeySigner::random();
        let terms = terms();
        let calls = CallLog::default();
        let ledger = Arc::new(
            InMemoryLedger::new(SETTLEMENT_SIGNER).with_balance(
                ASSET,
                payer.address(),
                options.balance,
            ),
        );
        let facilitator = FacilitatorLocal::new(
            "base-sepolia",
            Settler::new(RecordingLedger {
                inner: ledger.clone(),
                calls: calls.clone(),
            }),
        );
        let coordinator = ScriptedCoordinator {
            next: AtomicU64::new(FIRST_REQUEST_ID),
            refuse: options.refuse_trigger,
            delay: options.trigger_delay,
            calls: calls.clone(),
        };
        let outcomes = vec!["common".to_string(), "rare".to_string(), "legendary".to_string()];
        let bridge = Arc::new(OracleBridge::new(coordinator, outcomes).unwrap());
        let reconciliation = ReconciliationLog::new();
        let mut gate = Paygate::new(Arc::new(facilitator), bridge.clone(), terms.clone())
            .with_reconciliation_log(reconciliation.clone());
        if let Some(window) = options.min_remaining_window {
            gate = gate.with_min_remaining_window(window);
        }
        Self {
            app: routes::routes(gate),
            terms,
            ledger,
            bridge,
            reconciliation,
            calls,
            payer,
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, call: Call) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }

    async fn payment_header(&self, terms: &PaymentTerms) -> String {
        let client = X402Client::new(self.payer.clone());
        let header = client.make_payment_header(terms).await.unwrap();
        header.to_str().unwrap().to_string()
    }

    async fn get(&self, uri: &str, payment: Option<&str>) -> (StatusCode, Value) {
        let mut request = Request::builder().uri(uri);
        if let Some(payment) = payment {
            request = request.header(PAYMENT_HEADER_NAME, payment);
        }
        let response = self
            .app
            .clone()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }
}

fn terms() -> PaymentTerms {
    PaymentTerms {
        scheme: Scheme::Exact,
        network: "base-sepolia".to_string(),
        max_amount_required: U256::from(50_000u64),
        resource: "https://vrf.example.com/mint".parse().unwrap(),
        description: "One verifiable random mint".to_string(),
        mime_type: "application/json".to_string(),
        pay_to: PAY_TO,
        max_timeout_seconds: 60,
        asset: ASSET,
        extra: Some(PaymentTermsExtra {
            name: "USDC".to_string(),
            version: "2".to_string(),
        }),
    }
}

#[tokio::test]
async fn paid_mint_settles_and_returns_request_id() {
    let harness = Harness::new(false);
    let header = harness.payment_header(&harness.terms).await;

    let (status, body) = harness.get("/mint", Some(&header)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["requestId"], FIRST_REQUEST_ID.to_string());
    assert_eq!(body["settlement"]["success"], true);
    assert!(body["settlement"]["txHash"].is_string());
    assert_eq!(
        harness.ledger.balance_of(ASSET, PAY_TO).await,
        U256::from(50_000u64)
    );
    assert_eq!(
        harness.calls(),
        vec![Call::NonceCheck, Call::Trigger, Call::Transfer]
    );

    let (status, body) = harness.get("/requests/100", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fulfilled"], false);
    let beneficiary: Address = serde_json::from_value(body["beneficiary"].clone()).unwrap();
    assert_eq!(beneficiary, harness.payer.address());
}

#[tokio::test]
async fn missing_header_returns_declared_terms() {
    let harness = Harness::new(false);

    let (status, body) = harness.get("/mint", None).await;

    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    let challenge: PaymentRequired = serde_json::from_value(body).unwrap();
    assert_eq!(challenge.payment_details, harness.terms);
    assert!(harness.calls().is_empty());
}

#[tokio::test]
async fn underpayment_is_rejected_without_settlement() {
    let harness = Harness::new(false);
    let mut underpaid = harness.terms.clone();
    underpaid.max_amount_required = U256::from(40_000u64);
    let header = harness.payment_header(&underpaid).await;

    let (status, body) = harness.get("/mint", Some(&header)).await;

    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"], "insufficient_amount");
    assert_eq!(body["paymentDetails"]["maxAmountRequired"], "50000");
    assert_eq!(harness.count(Call::Trigger), 0);
    assert_eq!(harness.count(Call::Transfer), 0);
    assert!(harness.ledger.transfers().await.is_empty());
}

#[tokio::test]
async fn refused_trigger_returns_500_without_settlement() {
    let harness = Harness::new(true);
    let header = harness.payment_header(&harness.terms).await;

    let (status, body) = harness.get("/mint", Some(&header)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "action_failed");
    assert_eq!(harness.count(Call::Trigger), 1);
    assert_eq!(harness.count(Call::Transfer), 0);
    assert_eq!(
        harness.ledger.balance_of(ASSET, harness.payer.address()).await,
        U256::from(1_000_000u64)
    );
    assert_eq!(harness.bridge.pending_count(), 0);
}

#[tokio::test]
async fn unknown_fulfillment_is_parked_not_minted() {
    let harness = Harness::new(false);

    let outcome = harness
        .bridge
        .on_fulfillment(U256::from(424242u64), &[U256::from(7u64)]);

    assert_eq!(outcome, FulfillmentOutcome::Unknown);
    assert_eq!(harness.bridge.parked_count(), 1);
    assert_eq!(harness.bridge.minted_count(), 0);
    let (status, body) = harness.get("/requests/424242", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "unknown_request");
}

#[tokio::test]
async fn fulfillment_through_the_event_loop_mints_once() {
    let harness = Harness::new(false);
    let header = harness.payment_header(&harness.terms).await;
    let (status, _) = harness.get("/mint", Some(&header)).await;
    assert_eq!(status, StatusCode::OK);

    let (events_tx, events_rx) = mpsc::channel(8);
    let bridge = harness.bridge.clone();
    let bridge_loop =
        tokio::spawn(async move { bridge.run(events_rx, CancellationToken::new()).await });
    let event = FulfillmentEvent {
        request_id: U256::from(FIRST_REQUEST_ID),
        random_words: vec![U256::from(5u64)],
    };
    events_tx.send(event.clone()).await.unwrap();
    events_tx.send(event).await.unwrap();
    drop(events_tx);
    bridge_loop.await.unwrap();

    assert_eq!(harness.bridge.minted_count(), 1);
    let (status, body) = harness.get("/requests/100", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fulfilled"], true);
    assert_eq!(body["beneficiary"], Value::Null);
    assert_eq!(body["result"]["outcome"], "legendary");
    assert_eq!(body["result"]["tokenId"], 0);
    assert_eq!(body["result"]["randomWords"][0], "5");
}

#[tokio::test]
async fn replayed_authorization_moves_funds_once() {
    let harness = Harness::new(false);
    let header = harness.payment_header(&harness.terms).await;

    let (first, _) = harness.get("/mint", Some(&header)).await;
    let (second, body) = harness.get("/mint", Some(&header)).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"], "nonce_already_used");
    assert_eq!(harness.ledger.transfers().await.len(), 1);
    assert_eq!(harness.count(Call::Trigger), 1);
}

#[tokio::test]
async fn concurrent_replays_trigger_and_settle_once() {
    let harness = Harness::with_options(Options {
        trigger_delay: Duration::from_millis(200),
        ..Options::default()
    });
    let header = harness.payment_header(&harness.terms).await;

    let (a, b, c) = tokio::join!(
        harness.get("/mint", Some(&header)),
        harness.get("/mint", Some(&header)),
        harness.get("/mint", Some(&header)),
    );

    let responses = [a, b, c];
    let settled: Vec<_> = responses
        .iter()
        .filter(|(status, _)| *status == StatusCode::OK)
        .collect();
    assert_eq!(settled.len(), 1);
    assert_eq!(settled[0].1["requestId"], FIRST_REQUEST_ID.to_string());
    for (status, body) in responses.iter().filter(|(status, _)| *status != StatusCode::OK) {
        assert_eq!(*status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["error"], "nonce_already_used");
    }
    assert_eq!(harness.count(Call::Trigger), 1);
    assert_eq!(harness.count(Call::Transfer), 1);
    assert_eq!(harness.ledger.transfers().await.len(), 1);
    assert_eq!(harness.bridge.pending_count(), 1);
    assert!(harness.reconciliation.is_empty().await);
}

#[tokio::test]
async fn refused_trigger_leaves_the_authorization_usable() {
    let harness = Harness::new(true);
    let header = harness.payment_header(&harness.terms).await;

    let (first, _) = harness.get("/mint", Some(&header)).await;
    let (second, body) = harness.get("/mint", Some(&header)).await;

    assert_eq!(first, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(second, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "action_failed");
    assert_eq!(harness.count(Call::Trigger), 2);
    assert_eq!(harness.count(Call::Transfer), 0);
}

#[tokio::test]
async fn authorization_expiring_before_settlement_is_rejected() {
    let harness = Harness::with_options(Options {
        min_remaining_window: Some(Duration::from_secs(120)),
        ..Options::default()
    });
    let header = harness.payment_header(&harness.terms).await;

    let (status, body) = harness.get("/mint", Some(&header)).await;

    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"], "authorization_window_too_short");
    assert_eq!(body["paymentDetails"]["maxTimeoutSeconds"], 60);
    assert_eq!(harness.count(Call::Trigger), 0);
    assert_eq!(harness.count(Call::Transfer), 0);
    assert!(harness.ledger.transfers().await.is_empty());
}

#[tokio::test]
async fn settlement_failure_after_trigger_is_reconciled() {
    let harness = Harness::with_options(Options {
        balance: U256::ZERO,
        ..Options::default()
    });
    let header = harness.payment_header(&harness.terms).await;

    let (status, body) = harness.get("/mint", Some(&header)).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["settlement"]["success"], false);
    assert_eq!(body["settlement"]["error"], "insufficient_balance");
    let entries = harness.reconciliation.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].request_id, FIRST_REQUEST_ID.to_string());
    assert_eq!(entries[0].payer, harness.payer.address());
}

#[tokio::test]
async fn malformed_header_is_a_bad_request() {
    let harness = Harness::new(false);

    let (status, body) = harness.get("/mint", Some("%%%not-base64%%%")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_payment_header");
    assert!(harness.calls().is_empty());
}

#[tokio::test]
async fn request_status_rejects_non_decimal_ids() {
    let harness = Harness::new(false);

    let (status, body) = harness.get("/requests/0xabc", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request_id");
}

#[tokio::test]
async fn paying_client_mints_over_http() {
    let harness = Harness::new(false);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = harness.app.clone();
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    let client = reqwest::Client::new()
        .with_payments(X402Client::new(harness.payer.clone()).with_max_amount(U256::from(50_000u64)))
        .build();
    let response = client
        .get(format!("http://{addr}/mint"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["requestId"], FIRST_REQUEST_ID.to_string());
    assert_eq!(harness.ledger.transfers().await.len(), 1);
    server.abort();
}
