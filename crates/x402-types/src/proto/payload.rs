//! The `X-PAYMENT` header envelope and its codec.
//!
//! The header value is `base64(JSON(PaymentHeaderPayload))`:
//!
//! ```json
//! {
//!   "x402Version": 1,
//!   "scheme": "exact",
//!   "network": "base-sepolia",
//!   "resource": "https://api.example.com/mint",
//!   "payload": {
//!     "signature": "0x...",
//!     "authorization": {
//!       "from": "0x...", "to": "0x...", "value": "50000",
//!       "validAfter": "1700000000", "validBefore": "1700000060", "nonce": "0x..."
//!     }
//!   }
//! }
//! ```
//!
//! Decoding rejects anything that is not valid base64, not valid JSON, carries a version
//! other than `1`, or names a scheme other than `"exact"`. Those are malformed headers, as
//! opposed to well-formed payments that fail verification.

use alloy_primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::Display;
use url::Url;

use crate::proto::Scheme;
use crate::timestamp::UnixTimestamp;
use crate::util::{Base64Bytes, decimal_u256};

/// Name of the request header carrying the payment.
pub const PAYMENT_HEADER_NAME: &str = "X-PAYMENT";

/// Version marker that serializes as `1` and refuses anything else.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct X402Version1;

impl X402Version1 {
    pub const VALUE: u8 = 1;
}

impl Serialize for X402Version1 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(Self::VALUE)
    }
}

impl<'de> Deserialize<'de> for X402Version1 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let num = u8::deserialize(deserializer)?;
        if num == Self::VALUE {
            Ok(X402Version1)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected version {}, got {}",
                Self::VALUE,
                num
            )))
        }
    }
}

impl Display for X402Version1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Self::VALUE)
    }
}

/// Caller-signed ERC-3009 authorization fields.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAuthorization {
    /// Payer.
    pub from: Address,
    /// Payee.
    pub to: Address,
    #[serde(with = "decimal_u256")]
    pub value: U256,
    /// Not valid before this time (inclusive).
    pub valid_after: UnixTimestamp,
    /// Not valid after this time (inclusive).
    pub valid_before: UnixTimestamp,
    /// Single-use 32-byte nonce.
    pub nonce: B256,
}

/// Authorization plus the 65-byte `r || s || v` signature over its EIP-712 hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmPayload {
    pub signature: Bytes,
    pub authorization: PaymentAuthorization,
}

/// The envelope carried in the `X-PAYMENT` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentHeaderPayload {
    pub x402_version: X402Version1,
    pub scheme: Scheme,
    pub network: String,
    pub payload: ExactEvmPayload,
    /// Resource the payment targets.
    pub resource: Url,
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentHeaderDecodingError {
    #[error("payment header is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payment header is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("payment header is not a valid payment envelope: {0}")]
    Json(#[from] serde_json::Error),
}

impl PaymentHeaderPayload {
    /// Decodes raw header bytes.
    pub fn from_header(header: &[u8]) -> Result<Self, PaymentHeaderDecodingError> {
        let bytes = Base64Bytes::from(header).decode()?;
        let json = String::from_utf8(bytes)?;
        let payload = serde_json::from_str(&json)?;
        Ok(payload)
    }

    /// Encodes into the header representation.
    pub fn to_header(&self) -> Result<Base64Bytes<'static>, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        Ok(Base64Bytes::encode(json))
    }

    pub fn authorization(&self) -> &PaymentAuthorization {
        &self.payload.authorization
    }

    pub fn payer(&self) -> Address {
        self.payload.authorization.from
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    fn sample() -> PaymentHeaderPayload {
        PaymentHeaderPayload {
            x402_version: X402Version1,
            scheme: Scheme::Exact,
            network: "base-sepolia".to_string(),
            payload: ExactEvmPayload {
                signature: Bytes::from(vec![7u8; 65]),
                authorization: PaymentAuthorization {
                    from: address!("0x1111111111111111111111111111111111111111"),
                    to: address!("0x2222222222222222222222222222222222222222"),
                    value: U256::from(50_000u64),
                    valid_after: UnixTimestamp::from_secs(1_700_000_000),
                    valid_before: UnixTimestamp::from_secs(1_700_000_060),
                    nonce: B256::repeat_byte(9),
                },
            },
            resource: "https://api.example.com/mint".parse().unwrap(),
        }
    }

    #[test]
    fn header_wire_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["x402Version"], 1);
        assert_eq!(json["scheme"], "exact");
        assert_eq!(json["payload"]["authorization"]["value"], "50000");
        assert_eq!(json["payload"]["authorization"]["validBefore"], "1700000060");
    }

    #[test]
    fn decodes_what_it_encodes() {
        let header = sample().to_header().unwrap();
        let decoded = PaymentHeaderPayload::from_header(header.as_ref()).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn rejects_bad_base64() {
        let result = PaymentHeaderPayload::from_header(b"%%%not-base64%%%");
        assert!(matches!(result, Err(PaymentHeaderDecodingError::Base64(_))));
    }

    #[test]
    fn rejects_non_utf8() {
        let header = Base64Bytes::encode([0xff, 0xfe, 0xfd]);
        let result = PaymentHeaderPayload::from_header(header.as_ref());
        assert!(matches!(result, Err(PaymentHeaderDecodingError::Utf8(_))));
    }

    #[test]
    fn rejects_non_envelope_json() {
        let header = Base64Bytes::encode(br#"{"hello":"world"}"#);
        let result = PaymentHeaderPayload::from_header(header.as_ref());
        assert!(matches!(result, Err(PaymentHeaderDecodingError::Json(_))));
    }

    #[test]
    fn rejects_wrong_version_and_scheme() {
        let mut json = serde_json::to_value(sample()).unwrap();
        json["x402Version"] = 2.into();
        let header = Base64Bytes::encode(serde_json::to_vec(&json).unwrap());
        assert!(PaymentHeaderPayload::from_header(header.as_ref()).is_err());

        let mut json = serde_json::to_value(sample()).unwrap();
        json["scheme"] = "upto".into();
        let header = Base64Bytes::encode(serde_json::to_vec(&json).unwrap());
        assert!(PaymentHeaderPayload::from_header(header.as_ref()).is_err());
    }
}
