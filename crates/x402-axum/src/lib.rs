//! x402 payment gate for axum resource servers.
//!
//! [`Paygate`] runs the x402 exchange for one protected action: it answers unpaid
//! requests with a 402 challenge, verifies the `X-PAYMENT` header through a
//! [`Facilitator`](x402_types::facilitator::Facilitator), triggers the
//! [`GatedAction`](x402_types::action::GatedAction), and settles the payment.
//!
//! ```rust,ignore
//! use axum::{Router, extract::State, http::HeaderMap, response::Response, routing::get};
//! use x402_axum::{FacilitatorClient, Paygate};
//!
//! let facilitator = Arc::new(FacilitatorClient::try_from("https://facilitator.example.com")?);
//! let gate = Paygate::new(facilitator, Arc::new(action), terms);
//!
//! async fn mint(State(gate): State<Paygate<FacilitatorClient, MyAction>>, headers: HeaderMap) -> Response {
//!     gate.handle(&headers).await
//! }
//!
//! let app = Router::new().route("/mint", get(mint)).with_state(gate);
//! ```
//!
//! The facilitator can be remote ([`facilitator_client::FacilitatorClient`]) or any
//! in-process implementation of the trait.

pub mod facilitator_client;
pub mod paygate;

pub use facilitator_client::FacilitatorClient;
pub use paygate::*;
