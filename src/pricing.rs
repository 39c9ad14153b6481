//! Pure pricing functions: spot price from V2 reserves or V3 `sqrtPriceX96`,
//! and a USD liquidity estimate from reserves/liquidity plus a reference
//! price. None of this touches the network or a lock; it operates on
//! already-fetched `PoolStateSample` data.

use crate::types::{DexType, PoolMetadata, PoolStateSample};
use ethers::types::{Address, U256};

fn u256_to_f64(v: U256) -> f64 {
    // U256::to_string() round-trips exactly; parsing avoids precision loss
    // from as_u128()/as_u64() truncation on genuinely large reserves.
    v.to_string().parse().unwrap_or(0.0)
}

fn decimals_adjustment(target_decimals: u8, quote_decimals: u8) -> f64 {
    10f64.powi(target_decimals as i32 - quote_decimals as i32)
}

/// Price of `target_token` denominated in `quote_token`, derived from the
/// pool's last observed state. Returns 0.0 for a pool with no liquidity
/// (zero reserves, or `sqrtPriceX96 == 0`) rather than panicking or
/// dividing by zero.
pub fn compute_spot_price(
    meta: &PoolMetadata,
    sample: &PoolStateSample,
    target_token: Address,
    target_decimals: u8,
    quote_decimals: u8,
) -> f64 {
    match meta.dex_type {
        DexType::V2 => {
            let reserve0 = u256_to_f64(sample.reserve0);
            let reserve1 = u256_to_f64(sample.reserve1);
            if reserve0 == 0.0 || reserve1 == 0.0 {
                return 0.0;
            }
            let raw = if target_token == meta.token0 {
                reserve1 / reserve0
            } else {
                reserve0 / reserve1
            };
            raw * decimals_adjustment(target_decimals, quote_decimals)
        }
        DexType::V3 => {
            if sample.sqrt_price_x96.is_zero() {
                return 0.0;
            }
            let sqrt_price = u256_to_f64(sample.sqrt_price_x96) / 2f64.powi(96);
            // price of token0 in units of token1
            let price_0_in_1 = sqrt_price * sqrt_price;
            let raw = if target_token == meta.token1 {
                // caller wants token1 priced in token0: invert
                if price_0_in_1 == 0.0 {
                    return 0.0;
                }
                1.0 / price_0_in_1
            } else {
                price_0_in_1
            };
            raw * decimals_adjustment(target_decimals, quote_decimals)
        }
    }
}

/// Scalar fed to `PoolController::update_pool_tier`'s relative-delta
/// comparison. V2 reuses the reserve-ratio spot price. V3 uses
/// `sqrt(sqrtPriceX96 / 2^96)` rather than the squared spot price
/// `compute_spot_price` returns -- a different monotone transform of the
/// same underlying tick, so it is not interchangeable with the displayed
/// price; it exists only so tier transitions compare against the scalar
/// this system's tier thresholds were tuned against.
pub fn tier_comparison_scalar(meta: &PoolMetadata, sample: &PoolStateSample, target_token: Address) -> f64 {
    match meta.dex_type {
        DexType::V2 => compute_spot_price(meta, sample, target_token, 18, 18),
        DexType::V3 => {
            if sample.sqrt_price_x96.is_zero() {
                return 0.0;
            }
            let sqrt_price = u256_to_f64(sample.sqrt_price_x96) / 2f64.powi(96);
            if target_token == meta.token1 {
                if sqrt_price == 0.0 {
                    return 0.0;
                }
                1.0 / sqrt_price
            } else {
                sqrt_price
            }
        }
    }
}

/// USD liquidity estimate. `price0_usd`/`price1_usd` are the per-token USD
/// prices the caller already has for the pool's two sides (e.g. one side
/// is the stable reference at $1, the other derived via `compute_spot_price`).
pub fn compute_liquidity_usd(
    meta: &PoolMetadata,
    sample: &PoolStateSample,
    token0_decimals: u8,
    token1_decimals: u8,
    price0_usd: f64,
    price1_usd: f64,
) -> f64 {
    match meta.dex_type {
        DexType::V2 => {
            let reserve0 = u256_to_f64(sample.reserve0) / 10f64.powi(token0_decimals as i32);
            let reserve1 = u256_to_f64(sample.reserve1) / 10f64.powi(token1_decimals as i32);
            reserve0 * price0_usd + reserve1 * price1_usd
        }
        DexType::V3 => {
            // Order-of-magnitude approximation, not an accounting figure:
            // active-range liquidity would need current tick + tick spacing.
            let liquidity = u256_to_f64(sample.liquidity);
            if price0_usd <= 0.0 || price1_usd <= 0.0 || liquidity <= 0.0 {
                return 0.0;
            }
            liquidity * 2.0 * (price0_usd * price1_usd).sqrt()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::order_pair;
    use std::time::Instant;

    fn addr(n: u8) -> Address {
        Address::from_low_u64_be(n as u64)
    }

    fn sample(reserve0: u64, reserve1: u64, sqrt_price_x96: U256, liquidity: u64) -> PoolStateSample {
        PoolStateSample {
            pool_address: addr(99),
            sqrt_price_x96,
            liquidity: U256::from(liquidity),
            reserve0: U256::from(reserve0),
            reserve1: U256::from(reserve1),
            block_number: 1,
            observed_at: Instant::now(),
        }
    }

    #[test]
    fn v2_price_matches_reserve_ratio() {
        let (t0, t1) = order_pair(addr(1), addr(2));
        let meta = PoolMetadata::new_v2(addr(10), t0, t1);
        let sample = sample(1_000, 2_000, U256::zero(), 0);
        let price = compute_spot_price(&meta, &sample, t0, 18, 18);
        assert_eq!(price, 2.0);
    }

    #[test]
    fn v2_zero_reserves_yields_zero_price_no_panic() {
        let (t0, t1) = order_pair(addr(1), addr(2));
        let meta = PoolMetadata::new_v2(addr(10), t0, t1);
        let sample = sample(0, 0, U256::zero(), 0);
        let price = compute_spot_price(&meta, &sample, t0, 18, 18);
        assert_eq!(price, 0.0);
    }

    #[test]
    fn v3_zero_sqrt_price_yields_zero_no_crash() {
        let (t0, t1) = order_pair(addr(1), addr(2));
        let meta = PoolMetadata::new_v3(addr(10), t0, t1, 3000);
        let sample = sample(0, 0, U256::zero(), 5_000);
        let price = compute_spot_price(&meta, &sample, t0, 18, 6);
        assert_eq!(price, 0.0);
    }

    #[test]
    fn v3_price_inverts_for_token1() {
        let (t0, t1) = order_pair(addr(1), addr(2));
        let meta = PoolMetadata::new_v3(addr(10), t0, t1, 3000);
        // sqrtPriceX96 for price_0_in_1 = 4.0 -> sqrt = 2.0 -> sqrtPriceX96 = 2 * 2^96
        let sqrt_price_x96 = U256::from(2u64) * (U256::one() << 96);
        let sample = sample(0, 0, sqrt_price_x96, 1_000);

        let price_t0 = compute_spot_price(&meta, &sample, t0, 18, 18);
        let price_t1 = compute_spot_price(&meta, &sample, t1, 18, 18);

        assert!((price_t0 - 4.0).abs() < 1e-9);
        assert!((price_t1 - 0.25).abs() < 1e-9);
    }

    #[test]
    fn v3_tier_scalar_is_sqrt_not_square_of_spot_price() {
        let (t0, t1) = order_pair(addr(1), addr(2));
        let meta = PoolMetadata::new_v3(addr(10), t0, t1, 3000);
        // sqrtPriceX96 / 2^96 = 2.0, so the squared spot price is 4.0 but
        // the tier scalar should be the unsquared 2.0.
        let sqrt_price_x96 = U256::from(2u64) * (U256::one() << 96);
        let sample = sample(0, 0, sqrt_price_x96, 1_000);

        let spot = compute_spot_price(&meta, &sample, t0, 18, 18);
        let tier_scalar = tier_comparison_scalar(&meta, &sample, t0);

        assert!((spot - 4.0).abs() < 1e-9);
        assert!((tier_scalar - 2.0).abs() < 1e-9);
    }

    #[test]
    fn v3_tier_scalar_inverts_for_token1() {
        let (t0, t1) = order_pair(addr(1), addr(2));
        let meta = PoolMetadata::new_v3(addr(10), t0, t1, 3000);
        let sqrt_price_x96 = U256::from(2u64) * (U256::one() << 96);
        let sample = sample(0, 0, sqrt_price_x96, 1_000);

        let tier_scalar = tier_comparison_scalar(&meta, &sample, t1);
        assert!((tier_scalar - 0.5).abs() < 1e-9);
    }

    #[test]
    fn v2_tier_scalar_matches_spot_price() {
        let (t0, t1) = order_pair(addr(1), addr(2));
        let meta = PoolMetadata::new_v2(addr(10), t0, t1);
        let sample = sample(1_000, 2_000, U256::zero(), 0);
        assert_eq!(tier_comparison_scalar(&meta, &sample, t0), 2.0);
    }

    #[test]
    fn v2_liquidity_usd_sums_both_sides() {
        let (t0, t1) = order_pair(addr(1), addr(2));
        let meta = PoolMetadata::new_v2(addr(10), t0, t1);
        let sample = sample(1_000_000, 2_000_000, U256::zero(), 0);
        let usd = compute_liquidity_usd(&meta, &sample, 6, 6, 1.0, 1.0);
        assert!((usd - 3.0).abs() < 1e-9);
    }
}
