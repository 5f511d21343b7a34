//! Requester side of an asynchronous randomness oracle.
//!
//! A paid request becomes one randomness request through a [`RandomnessCoordinator`];
//! the [`OracleBridge`] remembers who paid for which request id, and when the oracle's
//! fulfillment arrives it selects an outcome and assigns the next sequential token to
//! that beneficiary.
//!
//! ```text
//!   Paygate --trigger--> OracleBridge --request--> RandomnessCoordinator (consumer contract)
//!                             ^                                   |
//!                             |            FulfillmentEvent       v
//!                             +------ mpsc <-- FulfillmentPoller (RandomnessFulfilled logs)
//! ```

pub mod bridge;
pub mod coordinator;
pub mod eip155;
pub mod types;

pub use bridge::*;
pub use coordinator::*;
pub use types::*;
