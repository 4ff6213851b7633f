//! Quadratic backoff.

use std::time::Duration;

/// Delay before retry number `attempt` (1-based): `attempt² × base_ms`, capped at `max_ms`.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let factor = u64::from(attempt).saturating_mul(u64::from(attempt));
    let delay_ms = base_ms.saturating_mul(factor);

    Duration::from_millis(delay_ms.min(max_ms))
}
