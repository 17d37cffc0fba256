//! Retry delay calculation with exponential backoff

use rand::Rng;

/// `min(base * 2^(attempt - 1), max_delay)`, for a 1-indexed `attempt`
#[must_use]
pub fn exponential_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    let exponent = attempt.saturating_sub(1);
    if exponent >= 63 {
        // 2^63 would overflow
        return max_delay_ms;
    }

    base_delay_ms
        .saturating_mul(1u64 << exponent)
        .min(max_delay_ms)
}

/// Spread `delay_ms` by up to `± jitter_factor` of itself
///
/// A factor of zero (or less) leaves the delay untouched.
#[must_use]
pub fn apply_jitter(delay_ms: u64, jitter_factor: f64) -> u64 {
    if jitter_factor <= 0.0 || delay_ms == 0 {
        return delay_ms;
    }

    // Intentional precision loss and casting for randomization
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    {
        let jitter_range = (delay_ms as f64) * jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        ((delay_ms as f64) + jitter).max(0.0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_calculation() {
        assert_eq!(exponential_delay(1, 2000, 3_600_000), 2000);
        assert_eq!(exponential_delay(2, 2000, 3_600_000), 4000);
        assert_eq!(exponential_delay(3, 2000, 3_600_000), 8000);
        assert_eq!(
            exponential_delay(20, 2000, 3_600_000),
            3_600_000,
            "High attempt number should be capped at max_delay"
        );
        assert_eq!(exponential_delay(200, 2000, 3_600_000), 3_600_000);
    }

    #[test]
    fn test_attempt_zero_treated_as_first() {
        assert_eq!(exponential_delay(0, 2000, 3_600_000), 2000);
    }

    #[test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    fn test_jitter_within_range() {
        let jitter_factor = 0.2;
        for _ in 0..100 {
            let delay = apply_jitter(4000, jitter_factor);
            assert!(
                (3200..=4800).contains(&delay),
                "Delay {delay} should be within ±20% of 4000"
            );
        }
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        assert_eq!(apply_jitter(4000, 0.0), 4000);
    }
}
