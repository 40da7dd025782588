//! # Reconnection Backoff
//!
//! Delay arithmetic for reconnect attempts.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BACKOFF STRATEGY (Exponential with multiplicative jitter)             │
//! │  ─────────────────────────────────────────────────────                 │
//! │  delay(n) = min(base * 2^(n-1), max)                                   │
//! │  jittered ∈ [delay(n) * (1 - j), delay(n) * (1 + j)]                   │
//! │                                                                         │
//! │  base = 1s, max = 30s:                                                 │
//! │  Attempt 1: 1s                                                          │
//! │  Attempt 2: 2s                                                          │
//! │  Attempt 3: 4s                                                          │
//! │  ...                                                                    │
//! │  Attempt 6+: 30s                                                        │
//! │                                                                         │
//! │  The attempt counter only resets on a successful Open.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Backoff Policy
// =============================================================================

/// Parameters of the reconnection backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first reconnect attempt.
    pub base: Duration,

    /// Upper bound for the un-jittered delay.
    pub max: Duration,

    /// Jitter fraction `j`: the delay is scaled by a factor in `[1-j, 1+j]`.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Creates a policy. Use [`BackoffPolicy::validate`] before relying on it.
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        BackoffPolicy { base, max, jitter }
    }

    /// Checks that the policy can produce sensible delays.
    pub fn validate(&self) -> CoreResult<()> {
        if self.base.is_zero() {
            return Err(CoreError::InvalidBackoff("base delay must be positive".into()));
        }
        if self.max < self.base {
            return Err(CoreError::InvalidBackoff(format!(
                "max delay {:?} is smaller than base delay {:?}",
                self.max, self.base
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(CoreError::InvalidBackoff(format!(
                "jitter must be within 0.0..=1.0, got {}",
                self.jitter
            )));
        }
        Ok(())
    }

    /// Returns the un-jittered delay for a 1-based attempt number.
    ///
    /// Attempt 0 has no delay. Large attempt numbers saturate at `max`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 1u32.checked_shl(attempt - 1);
        match factor.and_then(|f| self.base.checked_mul(f)) {
            Some(delay) => delay.min(self.max),
            None => self.max,
        }
    }

    /// Returns the inclusive range a jittered delay for `attempt` must fall in.
    pub fn jitter_bounds(&self, attempt: u32) -> (Duration, Duration) {
        let computed = self.delay_for(attempt);
        let low = computed.mul_f64((1.0 - self.jitter).max(0.0));
        let high = computed.mul_f64(1.0 + self.jitter);
        (low, high)
    }
}

// =============================================================================
// Backoff State
// =============================================================================

/// Progress through one disconnection episode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffState {
    /// Number of reconnect attempts scheduled since the last Open.
    pub attempt: u32,

    /// Delay used for the most recent attempt.
    pub last_delay: Option<Duration>,
}

impl BackoffState {
    /// Records that another attempt was scheduled with `delay`.
    pub fn record(&mut self, delay: Duration) {
        self.attempt = self.attempt.saturating_add(1);
        self.last_delay = Some(delay);
    }

    /// Clears the episode (called on a successful Open).
    pub fn reset(&mut self) {
        *self = BackoffState::default();
    }
}
