// Validation utilities module
// Custom validator functions for receipt submissions and line items

use regex::Regex;
use rust_decimal::Decimal;
use std::sync::OnceLock;
use validator::ValidationError;

/// Longest receipt number accepted from the capture apps
pub const MAX_RECEIPT_NUMBER_LEN: usize = 64;

fn receipt_number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9/-]+$").unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

/// Digits kept after the decimal point in stored amounts
pub const MONEY_SCALE: u32 = 2;

/// Amounts must stay below this many whole currency units (`NUMERIC(12, 2)`)
pub const MONEY_LIMIT_UNITS: i64 = 10_000_000_000;

/// Validates a monetary amount: not negative, whole cents, below the column limit
///
/// Trailing zeros are ignored, so `100.000` passes while `100.004` does not.
pub fn validate_money_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(ValidationError::new("amount_must_not_be_negative"));
    }
    if amount.normalize().scale() > MONEY_SCALE {
        return Err(ValidationError::new("amount_finer_than_cents"));
    }
    if *amount >= Decimal::from(MONEY_LIMIT_UNITS) {
        return Err(ValidationError::new("amount_too_large"));
    }
    Ok(())
}

/// Validates a printed receipt number: 1 to 64 characters of letters, digits, '-' or '/'
pub fn validate_receipt_number(number: &str) -> Result<(), ValidationError> {
    if number.is_empty() || number.len() > MAX_RECEIPT_NUMBER_LEN {
        return Err(ValidationError::new("receipt_number_length"));
    }
    if !receipt_number_pattern().is_match(number) {
        return Err(ValidationError::new("receipt_number_format"));
    }
    Ok(())
}
