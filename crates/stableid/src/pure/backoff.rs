//! Backoff between compare-and-swap attempts.

/// Result of a backoff computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffResult {
    /// How long to sleep before the next attempt.
    pub sleep_ms: u64,
    /// Backoff to feed into the following computation.
    pub next_backoff_ms: u64,
}

/// Compute exponential backoff with jitter.
///
/// Jitter is `jitter_seed % (current / 2 + 1)`, so it never exceeds half the
/// current backoff. The next backoff doubles, capped at `max_backoff_ms`.
///
/// ```ignore
/// let result = compute_backoff_with_jitter(100, 1000, 25);
/// assert_eq!(result.sleep_ms, 125);
/// assert_eq!(result.next_backoff_ms, 200);
/// ```
#[inline]
pub fn compute_backoff_with_jitter(current_backoff_ms: u64, max_backoff_ms: u64, jitter_seed: u64) -> BackoffResult {
    let max_jitter = current_backoff_ms.saturating_div(2).saturating_add(1);
    let jitter = jitter_seed % max_jitter;

    BackoffResult {
        sleep_ms: current_backoff_ms.saturating_add(jitter),
        next_backoff_ms: current_backoff_ms.saturating_mul(2).min(max_backoff_ms),
    }
}
