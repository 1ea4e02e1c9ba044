use proptest::prelude::*;
use reward_core::calculate_reward;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn non_decreasing_in_holdings(
        total in 0u64..=1_000_000_000,
        threshold in 1u64..=1_000_000_000_000,
        a in 0u64..=2_000_000_000_000,
        b in 0u64..=2_000_000_000_000,
    ) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(calculate_reward(total, threshold, lo) <= calculate_reward(total, threshold, hi));
    }

    #[test]
    fn bounded_by_floor_and_full(
        total in any::<u64>(),
        threshold in 1u64..,
        held in any::<u64>(),
    ) {
        let reward = calculate_reward(total, threshold, held);
        prop_assert!(reward >= total / 5);
        prop_assert!(reward <= total);
    }

    #[test]
    fn zero_holdings_pay_a_fifth(total in any::<u64>(), threshold in 1u64..) {
        prop_assert_eq!(calculate_reward(total, threshold, 0), total / 5);
    }

    #[test]
    fn at_or_above_threshold_pays_full(
        total in any::<u64>(),
        threshold in 0u64..=u64::MAX / 2,
        extra in 0u64..=u64::MAX / 2,
    ) {
        prop_assert_eq!(calculate_reward(total, threshold, threshold), total);
        prop_assert_eq!(calculate_reward(total, threshold, threshold + extra), total);
    }

    #[test]
    fn large_thresholds_stay_monotone(
        total in any::<u64>(),
        threshold in (1u64 << 61)..,
        a in any::<u64>(),
        b in any::<u64>(),
    ) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(calculate_reward(total, threshold, lo) <= calculate_reward(total, threshold, hi));
    }

    #[test]
    fn matches_exact_rational_formula(
        total in any::<u64>(),
        threshold in 1u64..,
        raw_held in any::<u64>(),
    ) {
        let held = raw_held % threshold;
        let reward = calculate_reward(total, threshold, held);
        if held == 0 {
            prop_assert_eq!(reward, total / 5);
        } else {
            // reward == floor(T * N / D) iff reward * D <= T * N < (reward + 1) * D
            let n = u128::from(threshold) + 4 * u128::from(held);
            let d = 5 * u128::from(threshold);
            let exact = wide_mul(u128::from(total), n);
            prop_assert!(wide_mul(u128::from(reward), d) <= exact);
            prop_assert!(exact < wide_mul(u128::from(reward) + 1, d));
        }
    }
}

/// Full 256-bit product as `(high, low)` words.
fn wide_mul(a: u128, b: u128) -> (u128, u128) {
    const MASK: u128 = u64::MAX as u128;
    let (a1, a0) = (a >> 64, a & MASK);
    let (b1, b0) = (b >> 64, b & MASK);
    let (mid, mid_carry) = (a1 * b0).overflowing_add(a0 * b1);
    let (lo, lo_carry) = (a0 * b0).overflowing_add(mid << 64);
    let hi = a1 * b1 + (mid >> 64) + (u128::from(mid_carry) << 64) + u128::from(lo_carry);
    (hi, lo)
}
