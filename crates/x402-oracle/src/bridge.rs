//! Correlates paid requests with asynchronous oracle fulfillments.
//!
//! [`OracleBridge::submit`] asks the coordinator for randomness on behalf of a beneficiary
//! and records the request under the oracle-assigned id before returning. Fulfillments
//! arrive later, in any order relative to the payment settlement, through
//! [`OracleBridge::on_fulfillment`] or the [`OracleBridge::run`] loop.
//!
//! Delivery is idempotent: a fulfillment is applied at most once per request id, and each
//! applied fulfillment takes the next token id from a single counter.
//!
//! A fulfillment may be observed before `submit` has recorded its request, since the
//! oracle can answer within the block that carries the request. Such fulfillments are
//! reported as [`FulfillmentOutcome::Unknown`] and parked; if the matching request is
//! recorded later, the parked fulfillment is applied then. The parking area is bounded
//! by [`MAX_PARKED_FULFILLMENTS`].

use alloy_primitives::{Address, U256};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use x402_types::action::{ActionReceipt, GatedAction};

use crate::coordinator::{CoordinatorError, RandomnessCoordinator};
use crate::types::{
    Fulfillment, FulfillmentEvent, FulfillmentOutcome, GatedActionRequest, Minted, RequestId,
};

pub const MAX_PARKED_FULFILLMENTS: usize = 1024;

#[derive(Debug, thiserror::Error)]
#[error("at least one outcome is required")]
pub struct NoOutcomes;

pub struct OracleBridge<C> {
    coordinator: C,
    outcomes: Vec<String>,
    requests: DashMap<RequestId, GatedActionRequest>,
    parked: DashMap<RequestId, Vec<U256>>,
    next_token_id: AtomicU64,
}

impl<C> OracleBridge<C> {
    pub fn new(coordinator: C, outcomes: Vec<String>) -> Result<Self, NoOutcomes> {
        if outcomes.is_empty() {
            return Err(NoOutcomes);
        }
        Ok(Self {
            coordinator,
            outcomes,
            requests: DashMap::new(),
            parked: DashMap::new(),
            next_token_id: AtomicU64::new(0),
        })
    }

    pub fn coordinator(&self) -> &C {
        &self.coordinator
    }

    pub fn outcomes(&self) -> &[String] {
        &self.outcomes
    }

    /// Snapshot of a request.
    pub fn status(&self, request_id: &RequestId) -> Option<GatedActionRequest> {
        self.requests.get(request_id).map(|entry| entry.clone())
    }

    /// Requests submitted but not yet fulfilled.
    pub fn pending_count(&self) -> usize {
        self.requests.iter().filter(|entry| !entry.fulfilled).count()
    }

    /// Fulfillments waiting for their request to be recorded.
    pub fn parked_count(&self) -> usize {
        self.parked.len()
    }

    /// Number of tokens assigned so far.
    pub fn minted_count(&self) -> u64 {
        self.next_token_id.load(Ordering::SeqCst)
    }

    /// Applies an oracle fulfillment.
    pub fn on_fulfillment(&self, request_id: RequestId, random_words: &[U256]) -> FulfillmentOutcome {
        let Some(mut entry) = self.requests.get_mut(&request_id) else {
            tracing::warn!(%request_id, "Fulfillment for unknown request");
            self.park(request_id, random_words);
            return FulfillmentOutcome::Unknown;
        };
        if entry.fulfilled {
            tracing::info!(%request_id, "Duplicate fulfillment ignored");
            return FulfillmentOutcome::Duplicate;
        }
        let Some(owner) = entry.beneficiary else {
            return FulfillmentOutcome::Duplicate;
        };
        let Some(first_word) = random_words.first() else {
            tracing::warn!(%request_id, "Fulfillment carries no random words");
            return FulfillmentOutcome::Empty;
        };

        let outcome_index = select_outcome(*first_word, self.outcomes.len());
        let outcome = self.outcomes[outcome_index].clone();
        entry.fulfilled = true;
        let token_id = self.next_token_id.fetch_add(1, Ordering::SeqCst);
        entry.result = Some(Fulfillment {
            random_words: random_words.to_vec(),
            outcome_index,
            outcome: outcome.clone(),
            token_id,
            owner,
        });
        entry.beneficiary = None;
        drop(entry);

        tracing::info!(%request_id, %owner, token_id, outcome = %outcome, "Fulfillment applied");
        FulfillmentOutcome::Applied(Minted {
            request_id,
            token_id,
            owner,
            outcome_index,
            outcome,
        })
    }

    /// Consumes fulfillment events until cancelled or the sender side closes.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<FulfillmentEvent>,
        cancellation_token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    tracing::info!("Fulfillment loop cancelled");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => {
                        self.on_fulfillment(event.request_id, &event.random_words);
                    }
                    None => {
                        tracing::info!("Fulfillment channel closed");
                        break;
                    }
                }
            }
        }
    }

    fn park(&self, request_id: RequestId, random_words: &[U256]) {
        if self.parked.len() >= MAX_PARKED_FULFILLMENTS && !self.parked.contains_key(&request_id) {
            tracing::warn!(%request_id, "Parking area full, dropping fulfillment");
            return;
        }
        self.parked
            .entry(request_id)
            .or_insert_with(|| random_words.to_vec());
        // The request may have been recorded while parking.
        if self.requests.contains_key(&request_id) {
            self.apply_parked(request_id);
        }
    }

    fn apply_parked(&self, request_id: RequestId) {
        if let Some((_, words)) = self.parked.remove(&request_id) {
            tracing::info!(%request_id, "Applying parked fulfillment");
            self.on_fulfillment(request_id, &words);
        }
    }

    fn record(&self, request_id: RequestId, beneficiary: Address) {
        self.requests
            .entry(request_id)
            .or_insert_with(|| GatedActionRequest::pending(request_id, beneficiary));
        self.apply_parked(request_id);
    }
}

impl<C: RandomnessCoordinator + Sync> OracleBridge<C> {
    /// Requests randomness for `beneficiary` and records the request.
    #[cfg_attr(feature = "telemetry", tracing::instrument(skip_all, err, fields(%beneficiary)))]
    pub async fn submit(&self, beneficiary: Address) -> Result<RequestId, CoordinatorError> {
        let request_id = self.coordinator.request(beneficiary).await?;
        self.record(request_id, beneficiary);
        tracing::info!(%request_id, %beneficiary, "Randomness requested");
        Ok(request_id)
    }
}

impl<C> GatedAction for OracleBridge<C>
where
    C: RandomnessCoordinator + Send + Sync,
{
    type Error = CoordinatorError;

    async fn trigger(&self, beneficiary: Address) -> Result<ActionReceipt, Self::Error> {
        let request_id = self.submit(beneficiary).await?;
        Ok(ActionReceipt {
            request_id: request_id.to_string(),
        })
    }
}

/// Reduces a random word to an index over the full 256-bit value.
pub fn select_outcome(word: U256, outcomes: usize) -> usize {
    if outcomes == 0 {
        return 0;
    }
    (word % U256::from(outcomes)).saturating_to::<usize>()
}
