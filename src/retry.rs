//! Delay strategies for loops that retry until the device answers
//!
//! `FixedDelay::forever` keeps retrying at a constant pace and never gives up.
//! `ExponentialBackoff` is the bounded alternative for callers that want the
//! loop to end eventually.

use std::time::Duration;

/// Decides how long to wait before the next attempt
pub trait RetryPolicy: Send + Sync {
    /// Delay before attempt `attempt + 1`, given that `attempt` attempts failed
    /// (starting at 1). `None` ends the loop.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl FixedDelay {
    pub fn forever(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    pub fn limited(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: Some(max_attempts),
        }
    }
}

impl RetryPolicy for FixedDelay {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt >= max => None,
            _ => Some(self.delay),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            max_delay,
            max_attempts,
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        Some(self.initial.saturating_mul(factor).min(self.max_delay))
    }
}
