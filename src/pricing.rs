// Price and gas arithmetic shared by the executor.

use ethers::types::U256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Decimals of the oracle contract's fixed-point price unit.
pub const PRICE_DECIMALS: u32 = 18;

/// Nodes reject same-nonce replacements that bump the fee by less than this.
pub const MIN_REPLACEMENT_BUMP_PERCENT: u64 = 10;

/// Scale a decimal price by 10^18, truncating the remainder.
///
/// Returns `None` for negative prices or values that do not fit.
pub fn to_fixed_point(price: Decimal) -> Option<U256> {
    if price.is_sign_negative() && !price.is_zero() {
        return None;
    }
    let scale = Decimal::from(10u64.pow(PRICE_DECIMALS));
    let scaled = price.checked_mul(scale)?.trunc();
    scaled.to_u128().map(U256::from)
}

pub fn from_fixed_point(value: U256) -> Option<Decimal> {
    let raw = u128::try_from(value).ok()?;
    let raw = i128::try_from(raw).ok()?;
    Decimal::try_from_i128_with_scale(raw, PRICE_DECIMALS).ok()
}

/// `ceil(quote * (100 + percent) / 100)`
pub fn premium_gas_price(quote: U256, percent: u64) -> U256 {
    let numerator = quote.saturating_mul(U256::from(100 + percent));
    (numerator + U256::from(99)) / U256::from(100)
}

/// Premium-adjusted quote, or the fixed floor when the quote could not be read.
pub fn gas_price_or_floor<E>(quote: Result<U256, E>, floor: U256, percent: u64) -> U256 {
    match quote {
        Ok(quote) => premium_gas_price(quote, percent),
        Err(_) => floor,
    }
}

/// Gas price for a same-nonce replacement of a transaction priced at `previous`.
pub fn bumped_gas_price(previous: U256, percent: u64) -> U256 {
    let bumped = premium_gas_price(previous, percent.max(MIN_REPLACEMENT_BUMP_PERCENT));
    // ceil on tiny values can leave the price unchanged
    bumped.max(previous + U256::one())
}

pub fn gwei(amount: u64) -> U256 {
    U256::from(amount) * U256::exp10(9)
}

/// Wei rendered as ether for logging.
pub fn format_ether(wei: U256) -> String {
    match from_fixed_point(wei) {
        Some(ether) => format!("{:.4}", ether),
        None => format!("{} wei", wei),
    }
}
