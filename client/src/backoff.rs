use rand::{Rng, RngCore};
use std::time::Duration;

/// Exponential reconnect delay with equal jitter.
#[derive(Clone, Debug)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
        }
    }

    /// Delay before the next attempt; doubles the base delay up to `max`.
    pub fn next_delay(&mut self, rng: &mut impl RngCore) -> Duration {
        let delay = jittered_backoff(rng, self.current);
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Call after a successful attempt.
    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

pub(crate) fn jittered_backoff(rng: &mut impl RngCore, backoff: Duration) -> Duration {
    let backoff_ms = backoff.as_millis() as u64;
    if backoff_ms <= 1 {
        return backoff;
    }

    // "Equal jitter": delay is in [backoff/2, backoff].
    let half_ms = backoff_ms / 2;
    let jitter_ms = rng.gen_range(0..=half_ms);
    Duration::from_millis(half_ms.saturating_add(jitter_ms))
}
