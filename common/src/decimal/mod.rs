//! Decimal type utilities for precise currency amounts

use std::str::FromStr;

pub use rust_decimal::{Decimal, RoundingStrategy};
pub use rust_decimal_macros::dec;

use crate::error::{Error, Result};

/// Signed fixed-point currency amount (balances and deltas)
pub type Amount = Decimal;

/// Precision helpers for common operations
pub mod precision {
    use super::{Amount, RoundingStrategy};
    use crate::error::{Error, Result};

    /// Currency precision stored by the platform (4 decimal places)
    pub const AMOUNT_PRECISION: u32 = 4;

    /// Round an amount to the stored precision, half away from zero like
    /// a Postgres `NUMERIC(20,4)` column
    pub fn round_amount(amount: Amount) -> Amount {
        amount.round_dp_with_strategy(AMOUNT_PRECISION, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Accept an amount only if the store can hold it without rounding.
    ///
    /// Trailing zeros do not count, so `1.50000` passes while `0.00004`
    /// is rejected.
    pub fn validate_amount(amount: Amount) -> Result<Amount> {
        let normalized = amount.normalize();
        if normalized.scale() > AMOUNT_PRECISION {
            return Err(Error::ValidationError(format!(
                "amount {} has more than {} decimal places",
                amount, AMOUNT_PRECISION
            )));
        }
        Ok(normalized)
    }
}

/// Parse a decimal string into an amount.
///
/// Accepts plain notation (`"50"`, `"-12.5000"`) as well as scientific
/// notation (`"1e3"`), since bus peers may format floats either way.
pub fn parse_amount(raw: &str) -> Result<Amount> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::ValidationError("empty amount".to_string()));
    }

    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map(precision::round_amount)
        .map_err(|e| Error::ValidationError(format!("invalid amount '{}': {}", raw, e)))
}
