#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for x402-gated actions.
//!
//! A resource server protects one paid action behind an HTTP 402 challenge. The caller
//! answers the challenge with a signed ERC-3009 `transferWithAuthorization`, which a
//! facilitator verifies and later settles on-chain. This crate holds the pieces every
//! participant shares:
//!
//! - [`proto`] - Wire format: [`proto::PaymentTerms`], the `X-PAYMENT` envelope
//!   ([`proto::PaymentHeaderPayload`]) and facilitator request/response bodies
//! - [`eip712`] - The `TransferWithAuthorization` typed data and its signing hash
//! - [`facilitator`] - The [`facilitator::Facilitator`] trait (verify/settle)
//! - [`action`] - The [`action::GatedAction`] trait triggered after verification
//! - [`config`] - Environment-variable aware configuration helpers
//! - [`networks`] - Known EVM networks and their chain ids
//! - [`timestamp`] - Unix timestamps used in authorization windows
//! - [`util`] - Base64 bytes, money amounts, decimal `U256` serde

pub mod action;
pub mod config;
pub mod eip712;
pub mod facilitator;
pub mod networks;
pub mod proto;
pub mod timestamp;
pub mod util;
