//! reqwest middleware that pays [x402](https://www.x402.org) challenges.
//!
//! When a request is answered with `402 Payment Required`, [`X402Client`] reads the
//! advertised terms, signs an ERC-3009 `TransferWithAuthorization` for them, and repeats
//! the request once with the `X-PAYMENT` header. A second 402 is final and surfaces as
//! [`X402Error::PaymentRejected`].
//!
//! ```rust,ignore
//! use alloy_signer_local::PrivateKeySigner;
//! use reqwest::Client;
//! use x402_reqwest::{ReqwestWithPayments, ReqwestWithPaymentsBuild, X402Client};
//!
//! let signer: PrivateKeySigner = "0x...".parse()?;
//! let http = Client::new()
//!     .with_payments(X402Client::new(signer).with_max_amount(U256::from(100_000u64)))
//!     .build();
//! let response = http.get("https://api.example.com/mint").send().await?;
//! ```

mod builder;
mod client;

pub use builder::*;
pub use client::*;
