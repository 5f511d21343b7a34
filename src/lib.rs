//! x402-gated randomness.
//!
//! A resource server that sells one randomness request per paid call. `GET /mint` answers
//! with a 402 challenge until the caller presents an `X-PAYMENT` header; a verified payment
//! submits a request to the randomness oracle on the payer's behalf, then settles the
//! payment and returns the request id. The oracle's fulfillment arrives later and assigns
//! an outcome and a token id, observable at `GET /requests/{requestId}`.
//!
//! The building blocks live in the workspace crates:
//!
//! - [`x402_types`] - wire format, EIP-712 typed data, `Facilitator` and `GatedAction` traits
//! - [`x402_facilitator_local`] - verifier, settler and ledgers
//! - [`x402_axum`] - the payment gate and the remote facilitator client
//! - [`x402_oracle`] - the oracle bridge and its EVM coordinator

pub mod config;
pub mod facilitator;
pub mod routes;
pub mod run;
