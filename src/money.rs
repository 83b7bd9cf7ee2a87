//! Money Module
//!
//! Every amount in the storefront core is a `rust_decimal::Decimal` in major
//! units (e.g. `12.50` CNY). Conversions to provider formats (minor units,
//! fixed two-decimal strings) MUST go through this module.
//!
//! ## Rules
//! 1. Stored amounts carry at most [`AMOUNT_SCALE`] decimal places
//! 2. Rounding is always midpoint-away-from-zero, applied once per computed value
//! 3. Parsing from clients is strict: no `.5`, no `5.`, no sign

use rust_decimal::prelude::*;
use rust_decimal::RoundingStrategy;
use thiserror::Error;

/// Decimal places kept for every stored amount
pub const AMOUNT_SCALE: u32 = 2;

/// Money conversion errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Round to the storage scale.
#[inline]
pub fn round_amount(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `base * rate / 100`, rounded. Used for percentage coupons and channel fees.
pub fn percent_of(base: Decimal, rate_percent: Decimal) -> Decimal {
    round_amount(base * rate_percent / Decimal::ONE_HUNDRED)
}

/// Convert a major-unit amount to provider minor units (fen / cents).
///
/// Fails instead of truncating when the amount carries sub-cent precision.
pub fn to_minor_units(amount: Decimal) -> Result<i64, MoneyError> {
    if amount.is_sign_negative() {
        return Err(MoneyError::InvalidAmount);
    }
    let scaled = amount * Decimal::ONE_HUNDRED;
    if scaled.fract() != Decimal::ZERO {
        return Err(MoneyError::PrecisionOverflow {
            provided: amount.scale(),
            max: AMOUNT_SCALE,
        });
    }
    scaled.to_i64().ok_or(MoneyError::Overflow)
}

/// Convert provider minor units back to a major-unit amount.
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, AMOUNT_SCALE)
}

/// Fixed two-decimal string (`"12.50"`), the format Alipay, PayPal and the
/// aggregator gateways expect.
pub fn format_amount(amount: Decimal) -> String {
    format!("{:.2}", round_amount(amount))
}

/// Parse a provider- or client-supplied amount string.
///
/// # Errors
/// * `InvalidFormat` - empty, `.5`, `5.` or non-numeric input
/// * `InvalidAmount` - negative input
/// * `PrecisionOverflow` - more than [`AMOUNT_SCALE`] decimals
pub fn parse_amount(amount_str: &str) -> Result<Decimal, MoneyError> {
    let s = amount_str.trim();
    if s.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }
    if s.starts_with('-') {
        return Err(MoneyError::InvalidAmount);
    }
    if s.starts_with('.') {
        return Err(MoneyError::InvalidFormat(
            "missing leading zero (e.g., use 0.5 instead of .5)".into(),
        ));
    }
    if s.ends_with('.') {
        return Err(MoneyError::InvalidFormat(
            "missing fractional part (e.g., use 5.0 instead of 5.)".into(),
        ));
    }
    let value = Decimal::from_str(s).map_err(|e| MoneyError::InvalidFormat(e.to_string()))?;
    if value.scale() > AMOUNT_SCALE && value.normalize().scale() > AMOUNT_SCALE {
        return Err(MoneyError::PrecisionOverflow {
            provided: value.scale(),
            max: AMOUNT_SCALE,
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_round_amount_midpoint() {
        assert_eq!(round_amount(d("1.005")), d("1.01"));
        assert_eq!(round_amount(d("1.004")), d("1.00"));
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(d("99.99"), d("10")), d("10.00"));
        assert_eq!(percent_of(d("100"), d("0.6")), d("0.60"));
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(to_minor_units(d("12.34")).unwrap(), 1234);
        assert_eq!(to_minor_units(d("12")).unwrap(), 1200);
        assert!(matches!(
            to_minor_units(d("0.001")),
            Err(MoneyError::PrecisionOverflow { .. })
        ));
        assert_eq!(from_minor_units(1234), d("12.34"));
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(d("5")), "5.00");
        assert_eq!(format_amount(d("5.5")), "5.50");
    }

    #[test]
    fn test_parse_amount_strict() {
        assert_eq!(parse_amount("12.30").unwrap(), d("12.30"));
        assert_eq!(parse_amount("12.300").unwrap(), d("12.300"));
        assert!(parse_amount(".5").is_err());
        assert!(parse_amount("5.").is_err());
        assert!(parse_amount("").is_err());
        assert_eq!(parse_amount("-1"), Err(MoneyError::InvalidAmount));
        assert!(matches!(
            parse_amount("1.001"),
            Err(MoneyError::PrecisionOverflow { .. })
        ));
    }
}
