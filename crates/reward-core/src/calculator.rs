//! Holdings-weighted payout formula.
//!
//! The reward ramps linearly from a 20% floor (no holdings) to the full reward
//! once the winner holds at least the threshold amount:
//!
//! ```text
//! k >= A : T
//! k == 0 : floor(T / 5)
//! else   : floor(T * (0.2 + 0.8 * k / A)) == floor(T * (A + 4k) / (5A))
//! ```
//!
//! Everything is computed in integers so results truncate exactly and never
//! depend on float rounding.

/// Compute the payout for a winner holding `tokens_held` tokens.
///
/// An `amount_held` of zero means every holder qualifies for the full reward.
pub fn calculate_reward(total_reward: u64, amount_held: u64, tokens_held: u64) -> u64 {
    if tokens_held >= amount_held {
        return total_reward;
    }
    if tokens_held == 0 {
        return total_reward / 5;
    }

    let threshold = u128::from(amount_held);
    let numerator = threshold + 4 * u128::from(tokens_held);
    let amount = mul_div_floor(total_reward, numerator, 5 * threshold);
    u64::try_from(amount).unwrap_or(total_reward)
}

/// `floor(t * n / d)` without overflow for `n, d < 2^67` and `d > 0`.
///
/// `t` is split into 32-bit halves so every intermediate stays below `2^100`.
fn mul_div_floor(t: u64, n: u128, d: u128) -> u128 {
    let hi = u128::from(t >> 32) * n;
    let lo = u128::from(t & 0xFFFF_FFFF) * n;
    let (q, r) = (hi / d, hi % d);
    (q << 32) + ((r << 32) + lo) / d
}
