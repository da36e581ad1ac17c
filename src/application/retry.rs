//! Bounded retry policy for venue calls.

use std::time::Duration;

use serde::Deserialize;

/// Delay between consecutive attempts.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed { delay_ms: u64 },
    /// `base * factor^attempt`, capped at `max`.
    Exponential {
        base_ms: u64,
        factor: f64,
        max_ms: u64,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base_ms: 100,
            factor: 2.0,
            max_ms: 1_000,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Self::Exponential {
                base_ms,
                factor,
                max_ms,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let millis = (base_ms as f64) * factor.powi(exponent);
                let capped = millis.min(max_ms as f64).max(0.0);
                Duration::from_millis(capped as u64)
            }
        }
    }
}

/// Attempt bound plus backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. At least 1.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Single attempt, no retry.
    #[must_use]
    pub fn once() -> Self {
        Self::new(1, Backoff::Fixed { delay_ms: 0 })
    }

    /// Sleep before the retry that follows failed attempt `attempt` (0-based).
    pub async fn pause(&self, attempt: u32) {
        let delay = self.backoff.delay(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Backoff::default())
    }
}
