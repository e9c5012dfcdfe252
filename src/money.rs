//! Fixed-point money helpers. All amounts are `Decimal`; binary floating point never
//! touches a price.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::errors::ServiceError;

/// Fractional digits kept on every computed amount.
pub const DECIMAL_PLACES: u32 = 2;

const MINOR_UNITS_PER_MAJOR: Decimal = dec!(100);

/// Rounds to [`DECIMAL_PLACES`] with banker's rounding (midpoint to even).
#[inline]
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp(DECIMAL_PLACES)
}

fn out_of_range(amount: Decimal) -> ServiceError {
    ServiceError::ValidationError(format!("amount {} out of range", amount))
}

/// `value` percent of `amount`, rounded.
pub fn percent_of(amount: Decimal, value: Decimal) -> Result<Decimal, ServiceError> {
    amount
        .checked_mul(value)
        .map(|product| round_money(product / Decimal::ONE_HUNDRED))
        .ok_or_else(|| out_of_range(amount))
}

/// `unit_price × quantity` without overflowing.
pub fn line_amount(unit_price: Decimal, quantity: i32) -> Result<Decimal, ServiceError> {
    unit_price
        .checked_mul(Decimal::from(quantity))
        .ok_or_else(|| out_of_range(unit_price))
}

/// Sum of `amounts`, failing instead of overflowing.
pub fn checked_total<I>(amounts: I) -> Result<Decimal, ServiceError>
where
    I: IntoIterator<Item = Decimal>,
{
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, |total, amount| {
            total.checked_add(amount).ok_or_else(|| out_of_range(total))
        })
}

/// Amount in gateway minor units (×100), as sent in the `amount` parameter.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    amount
        .checked_mul(MINOR_UNITS_PER_MAJOR)
        .map(round_money)
        .and_then(|minor| minor.trunc().to_i64())
        .ok_or_else(|| out_of_range(amount))
}

pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::from(minor) / MINOR_UNITS_PER_MAJOR
}
