//! Helper types shared across the workspace.
//!
//! - [`b64`] - Base64 bytes for the `X-PAYMENT` header
//! - [`money_amount`] - Human-readable prices such as `"$0.05"`
//! - [`decimal_u256`] - `U256` as a decimal JSON string

pub mod b64;
pub mod decimal_u256;
pub mod money_amount;

pub use b64::*;
pub use money_amount::*;
