//! V3 price conversion
//!
//! Converts the Q64.96 square-root price into decimal-adjusted ratios.
//! Intermediate math runs in 512 bits so sqrtPriceX96² never overflows;
//! the integer division rounds up in both directions.
//!
//! Created: 2026-02-03

use alloy::primitives::{U256, U512};

/// Largest decimals value accepted before the 512-bit product could overflow.
const MAX_DECIMALS: u8 = 60;

fn widen(v: U256) -> U512 {
    U512::from_limbs_slice(v.as_limbs())
}

fn pow10(exp: u8) -> Option<U512> {
    U512::from(10u64).checked_pow(U512::from(exp))
}

fn div_ceil(num: U512, den: U512) -> U512 {
    let (q, r) = num.div_rem(den);
    if r.is_zero() {
        q
    } else {
        q + U512::from(1u64)
    }
}

fn to_f64(v: U512) -> f64 {
    v.to_string().parse::<f64>().unwrap_or(0.0)
}

/// token1 per token0, decimals applied.
///
/// `ceil(sqrtPriceX96² · 10^dec0 / 2^192) / 10^dec1`
pub fn token0_price_in_token1(sqrt_price_x96: U256, decimals0: u8, decimals1: u8) -> f64 {
    if sqrt_price_x96.is_zero() || decimals0 > MAX_DECIMALS || decimals1 > MAX_DECIMALS {
        return 0.0;
    }
    let s = widen(sqrt_price_x96);
    let num = match pow10(decimals0).and_then(|p| s.checked_mul(s)?.checked_mul(p)) {
        Some(n) => n,
        None => return 0.0,
    };
    let den = U512::from(1u64) << 192;
    to_f64(div_ceil(num, den)) / 10f64.powi(decimals1 as i32)
}

/// token0 per token1, decimals applied.
///
/// `ceil(2^192 · 10^dec1 / sqrtPriceX96²) / 10^dec0`
pub fn token1_price_in_token0(sqrt_price_x96: U256, decimals0: u8, decimals1: u8) -> f64 {
    if sqrt_price_x96.is_zero() || decimals0 > MAX_DECIMALS || decimals1 > MAX_DECIMALS {
        return 0.0;
    }
    let s = widen(sqrt_price_x96);
    let num = match pow10(decimals1).and_then(|p| (U512::from(1u64) << 192usize).checked_mul(p)) {
        Some(n) => n,
        None => return 0.0,
    };
    to_f64(div_ceil(num, s * s)) / 10f64.powi(decimals0 as i32)
}

/// Raw integer amount to a decimal quantity.
pub fn to_decimal(amount: U256, decimals: u8) -> f64 {
    amount.to_string().parse::<f64>().unwrap_or(0.0) / 10f64.powi(decimals as i32)
}
