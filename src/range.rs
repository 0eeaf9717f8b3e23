//! In-range check and token amounts for a position
//!
//! No I/O. Tick and sqrt-price math comes from `uniswap_v3_math`; this
//! module only picks which deltas apply for the pool's current tick, the
//! same way the SDK's `Position.mintAmounts` does (amounts rounded up).
//!
//! Amounts are rendered with the decimals read from each token contract; a
//! wrong decimals value silently scales the displayed amount, so nothing
//! here assumes 18.

use alloy_primitives::utils::format_units;
use alloy_primitives::U256;

use uniswap_v3_math::error::UniswapV3MathError;
use uniswap_v3_math::sqrt_price_math::{_get_amount_0_delta, _get_amount_1_delta};
use uniswap_v3_math::tick_math::get_sqrt_ratio_at_tick;

use crate::chain::PoolSnapshot;
use crate::error::{Error, Result};

/// `tick_lower <= current_tick < tick_upper`
pub fn is_in_range(tick_lower: i32, tick_upper: i32, current_tick: i32) -> bool {
    tick_lower <= current_tick && tick_upper > current_tick
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenAmounts {
    pub amount0: U256,
    pub amount1: U256,
    pub decimals0: u8,
    pub decimals1: u8,
}

impl TokenAmounts {
    pub fn display0(&self) -> String {
        format_amount(self.amount0, self.decimals0)
    }

    pub fn display1(&self) -> String {
        format_amount(self.amount1, self.decimals1)
    }

    pub fn amount0_f64(&self) -> f64 {
        to_f64(self.amount0, self.decimals0)
    }

    pub fn amount1_f64(&self) -> f64 {
        to_f64(self.amount1, self.decimals1)
    }
}

/// Token amounts currently backing the position's liquidity
pub fn position_amounts(
    pool: &PoolSnapshot,
    tick_lower: i32,
    tick_upper: i32,
    liquidity: u128,
    decimals0: u8,
    decimals1: u8,
) -> Result<TokenAmounts> {
    if tick_lower >= tick_upper {
        return Err(Error::validation(format!("invalid tick range [{}, {})", tick_lower, tick_upper)));
    }

    let (amount0, amount1) = mint_amounts(pool.sqrt_price_x96, pool.tick, tick_lower, tick_upper, liquidity)
        .map_err(|e| Error::validation(format!("amounts for pool {}: {}", pool.pool, e)))?;

    Ok(TokenAmounts {
        amount0,
        amount1,
        decimals0,
        decimals1,
    })
}

fn mint_amounts(
    sqrt_price_x96: U256,
    current_tick: i32,
    tick_lower: i32,
    tick_upper: i32,
    liquidity: u128,
) -> std::result::Result<(U256, U256), UniswapV3MathError> {
    let sqrt_lower = get_sqrt_ratio_at_tick(tick_lower)?;
    let sqrt_upper = get_sqrt_ratio_at_tick(tick_upper)?;

    if current_tick < tick_lower {
        Ok((_get_amount_0_delta(sqrt_lower, sqrt_upper, liquidity, true)?, U256::ZERO))
    } else if current_tick < tick_upper {
        Ok((
            _get_amount_0_delta(sqrt_price_x96, sqrt_upper, liquidity, true)?,
            _get_amount_1_delta(sqrt_lower, sqrt_price_x96, liquidity, true)?,
        ))
    } else {
        Ok((U256::ZERO, _get_amount_1_delta(sqrt_lower, sqrt_upper, liquidity, true)?))
    }
}

/// Human readable amount, trailing zeros trimmed ("1.5", "0", "1200")
pub fn format_amount(amount: U256, decimals: u8) -> String {
    match format_units(amount, decimals) {
        Ok(formatted) if formatted.contains('.') => {
            formatted.trim_end_matches('0').trim_end_matches('.').to_string()
        }
        Ok(formatted) => formatted,
        Err(_) => amount.to_string(),
    }
}

pub fn to_f64(amount: U256, decimals: u8) -> f64 {
    format_amount(amount, decimals).parse().unwrap_or(0.0)
}
