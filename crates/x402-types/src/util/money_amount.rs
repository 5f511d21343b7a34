//! Human-readable prices.
//!
//! Operators configure the price of the gated action as `"$0.05"` or `"1,000"`. A
//! [`MoneyAmount`] keeps the exact decimal and scales it into the asset's smallest unit
//! with [`MoneyAmount::to_token_amount`].
//!
//! ```rust
//! use alloy_primitives::U256;
//! use x402_types::util::MoneyAmount;
//!
//! let price = MoneyAmount::parse("$0.05").unwrap();
//! assert_eq!(price.to_token_amount(6).unwrap(), U256::from(50_000u64));
//! ```

use alloy_primitives::U256;
use regex::Regex;
use rust_decimal::Decimal;
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::LazyLock;

/// A non-negative decimal amount parsed from a price string.
#[derive(Debug, Clone, PartialEq)]
pub struct MoneyAmount(pub Decimal);

#[derive(Debug, thiserror::Error)]
pub enum MoneyAmountParseError {
    #[error("Invalid number format")]
    InvalidFormat,
    #[error(
        "Amount must be between {} and {}",
        constants::MIN_STR,
        constants::MAX_STR
    )]
    OutOfRange,
    #[error("Negative value is not allowed")]
    Negative,
    #[error("Too big of a precision: {money} vs {token} on token")]
    WrongPrecision { money: u32, token: u32 },
}

mod constants {
    use super::*;

    pub const MIN_STR: &str = "0.000000001";
    pub const MAX_STR: &str = "999999999";

    pub static MIN: LazyLock<Decimal> = LazyLock::new(|| Decimal::new(1, 9));
    pub static MAX: LazyLock<Decimal> = LazyLock::new(|| Decimal::from(999_999_999u64));
}

static NON_NUMERIC: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[^\d\.\-]+").ok());

impl MoneyAmount {
    pub fn scale(&self) -> u32 {
        self.0.scale()
    }

    pub fn mantissa(&self) -> u128 {
        self.0.mantissa().unsigned_abs()
    }

    /// Strips currency symbols, separators and whitespace, then parses the rest.
    pub fn parse(input: &str) -> Result<Self, MoneyAmountParseError> {
        let cleaned = match NON_NUMERIC.as_ref() {
            Some(re) => re.replace_all(input, "").to_string(),
            None => input.trim().to_string(),
        };
        let parsed =
            Decimal::from_str(&cleaned).map_err(|_| MoneyAmountParseError::InvalidFormat)?;
        if parsed.is_sign_negative() {
            return Err(MoneyAmountParseError::Negative);
        }
        if parsed < *constants::MIN || parsed > *constants::MAX {
            return Err(MoneyAmountParseError::OutOfRange);
        }
        Ok(MoneyAmount(parsed))
    }

    /// Scales the amount into integer units of a token with `decimals` decimals.
    ///
    /// Fails when the amount carries more fractional digits than the token.
    pub fn to_token_amount(&self, decimals: u32) -> Result<U256, MoneyAmountParseError> {
        let scale = self.scale();
        if scale > decimals {
            return Err(MoneyAmountParseError::WrongPrecision {
                money: scale,
                token: decimals,
            });
        }
        let multiplier = U256::from(10u64).pow(U256::from(decimals - scale));
        Ok(U256::from(self.mantissa()) * multiplier)
    }
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MoneyAmount::parse(s)
    }
}

impl TryFrom<&str> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        MoneyAmount::from_str(value)
    }
}

impl From<u128> for MoneyAmount {
    fn from(value: u128) -> Self {
        MoneyAmount(Decimal::from(value))
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_currency_strings() {
        let amount = MoneyAmount::parse("$10.50").unwrap();
        assert_eq!(amount.scale(), 2);
        assert_eq!(amount.mantissa(), 1050);

        let amount = MoneyAmount::parse("1,000").unwrap();
        assert_eq!(amount.mantissa(), 1000);
    }

    #[test]
    fn rejects_negative_and_garbage() {
        assert!(matches!(
            MoneyAmount::parse("-5"),
            Err(MoneyAmountParseError::Negative)
        ));
        assert!(matches!(
            MoneyAmount::parse("abc"),
            Err(MoneyAmountParseError::InvalidFormat)
        ));
        assert!(matches!(
            MoneyAmount::parse("0"),
            Err(MoneyAmountParseError::OutOfRange)
        ));
    }

    #[test]
    fn scales_into_token_units() {
        let amount = MoneyAmount::parse("0.05").unwrap();
        assert_eq!(amount.to_token_amount(6).unwrap(), U256::from(50_000u64));
        assert_eq!(
            MoneyAmount::parse("2").unwrap().to_token_amount(18).unwrap(),
            U256::from(2_000_000_000_000_000_000u128)
        );
    }

    #[test]
    fn rejects_excess_precision() {
        let amount = MoneyAmount::parse("0.0000001").unwrap();
        assert!(matches!(
            amount.to_token_amount(6),
            Err(MoneyAmountParseError::WrongPrecision { money: 7, token: 6 })
        ));
    }
}
