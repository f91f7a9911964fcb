use std::time::Duration;

/// Exponential reconnection backoff.
///
/// Hands out `base * 2^attempts` until `max_attempts` delays were given,
/// then `None` for good until `reset` is called.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl Backoff {
    /// Creates a new `Backoff`.
    ///
    /// # Arguments
    /// * `base` - The first delay.
    /// * `max_attempts` - How many delays to hand out before giving up.
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            attempts: 0,
        }
    }

    /// Computes the delay before the next reconnect attempt.
    ///
    /// # Returns
    /// The delay, or `None` once the attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }

        let factor = 2u32.checked_pow(self.attempts).unwrap_or(u32::MAX);
        let delay = self.base.saturating_mul(factor);
        self.attempts += 1;
        Some(delay)
    }

    /// Forgets every attempt made so far, called on a successful open.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// The amount of delays handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
