#![forbid(unsafe_code)]

use rand::Rng;

/// Exponential backoff with additive jitter.
///
/// `delay = min(max_backoff_s, base^attempts) + jitter_frac * (base / 2)`
/// where `jitter_frac` is a fraction in `[0, 1)`. The fraction is a
/// parameter so callers that need determinism (tests) can pin it; live
/// callers use [`next_run_at_ms`], which draws it uniformly.
pub fn backoff_delay_s(attempts: u32, base: f64, max_backoff_s: u32, jitter_frac: f64) -> f64 {
    let exponential = base.powi(attempts.min(i32::MAX as u32) as i32);
    let capped = exponential.min(max_backoff_s as f64);
    capped + jitter_frac * (0.5 * base)
}

/// Compute the epoch-millisecond instant of the next attempt after a failure.
pub fn next_run_at_ms(now_ms: i64, attempts: u32, base: f64, max_backoff_s: u32) -> i64 {
    let jitter_frac = rand::thread_rng().gen_range(0.0..1.0);
    let delay_s = backoff_delay_s(attempts, base, max_backoff_s, jitter_frac);
    let delay_ms = (delay_s * 1000.0).round();
    if delay_ms <= 0.0 {
        return now_ms;
    }
    if delay_ms >= i64::MAX as f64 {
        return i64::MAX;
    }
    now_ms.saturating_add(delay_ms as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_retry_delay_is_one_second_plus_jitter() {
        // base^0 == 1, so attempts=0 always starts at 1s.
        assert_eq!(backoff_delay_s(0, 2.0, 3600, 0.0), 1.0);
        assert_eq!(backoff_delay_s(0, 2.0, 3600, 0.5), 1.5);
    }

    #[test]
    fn delay_is_monotonic_in_attempts_below_the_cap() {
        let mut prev = 0.0;
        for attempts in 0..10 {
            let delay = backoff_delay_s(attempts, 2.0, 3600, 0.0);
            assert!(delay >= prev, "attempts={attempts} regressed: {delay} < {prev}");
            prev = delay;
        }
    }

    #[test]
    fn delay_is_capped_at_max_plus_half_base() {
        let base = 3.0;
        for attempts in 0..64 {
            let delay = backoff_delay_s(attempts, base, 60, 0.999);
            assert!(delay < 60.0 + 0.5 * base);
            assert!(delay >= 0.0);
        }
        // At high attempt counts the exponential saturates at the cap.
        assert_eq!(backoff_delay_s(40, base, 60, 0.0), 60.0);
    }

    #[test]
    fn next_run_at_lands_in_the_expected_window() {
        let now = 1_000_000i64;
        for _ in 0..50 {
            let at = next_run_at_ms(now, 1, 2.0, 3600);
            // delay in [2.0, 3.0) seconds for attempts=1, base=2.
            assert!(at >= now + 2_000, "too early: {at}");
            assert!(at < now + 3_000, "too late: {at}");
        }
    }
}
