#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! In-process x402 facilitator.
//!
//! Verification and settlement of ERC-3009 `transferWithAuthorization` payments, without a
//! round-trip to a third-party facilitator service.
//!
//! # Modules
//!
//! - [`verifier`] - Stateless checks of an authorization against payment terms
//! - [`ledger`] - Where funds move: an EVM token contract or an in-memory ledger
//! - [`settler`] - Bounded-time settlement against a ledger
//! - [`facilitator_local`] - [`FacilitatorLocal`], the [`Facilitator`](x402_types::facilitator::Facilitator) over all of the above
//! - [`handlers`] - `/verify`, `/settle`, `/supported` HTTP endpoints
//! - [`util`] - Signal handling and telemetry
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use x402_facilitator_local::ledger::{Eip155Ledger, Eip155LedgerConfig};
//! use x402_facilitator_local::settler::Settler;
//! use x402_facilitator_local::{FacilitatorLocal, handlers};
//!
//! let ledger = Eip155Ledger::connect("base-sepolia", &ledger_config)?;
//! let facilitator = FacilitatorLocal::new("base-sepolia", Settler::new(ledger));
//! let app = axum::Router::new().merge(handlers::routes().with_state(Arc::new(facilitator)));
//! ```

pub mod facilitator_local;
pub mod handlers;
pub mod ledger;
pub mod settler;
pub mod util;
pub mod verifier;

pub use facilitator_local::*;
