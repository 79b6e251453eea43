use crate::error::PoolError;

/// Basis-point denominator.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Collateral rate applied to every stake (20%).
pub const COLLATERAL_RATE_BPS: u64 = 2_000;

/// Multiply then divide with a `u128` intermediate: `(a * b) / c`, rounded down.
pub fn mul_div(a: u64, b: u64, c: u64) -> Result<u64, PoolError> {
    if c == 0 {
        return Err(PoolError::Overflow("mul_div: division by zero"));
    }
    let product = (a as u128)
        .checked_mul(b as u128)
        .ok_or(PoolError::Overflow("mul_div: product"))?;
    u64::try_from(product / c as u128).map_err(|_| PoolError::Overflow("mul_div: result"))
}

/// Multiply a value by basis points: `(value * bps) / 10_000`.
pub fn bps_mul(value: u64, bps: u64) -> Result<u64, PoolError> {
    mul_div(value, bps, BPS_DENOMINATOR)
}

/// Collateral backing a stake. Always derived from the staked amount, never patched.
pub fn collateral_for(staked_amount: u64) -> u64 {
    // 2_000 / 10_000 never exceeds the input, so the division cannot overflow.
    ((staked_amount as u128 * COLLATERAL_RATE_BPS as u128) / BPS_DENOMINATOR as u128) as u64
}

pub fn checked_add(a: u64, b: u64, context: &'static str) -> Result<u64, PoolError> {
    a.checked_add(b).ok_or(PoolError::Overflow(context))
}

pub fn checked_sub(a: u64, b: u64, context: &'static str) -> Result<u64, PoolError> {
    a.checked_sub(b).ok_or(PoolError::Overflow(context))
}
