//! Bounded recovery for broken watch streams.
//!
//! When an upstream watch stream fails, its owner reloads and restarts it a
//! bounded number of times with exponential backoff. After that the kind is
//! given up on and marked unavailable.

use std::time::Duration;

/// Limits for watch stream recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResyncPolicy {
    /// Consecutive failures tolerated before giving up.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for the exponential part of the delay.
    pub max_delay: Duration,
}

impl ResyncPolicy {
    /// Default number of recovery attempts.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

    /// Delay before retry `attempt` (1-based), without jitter.
    ///
    /// Formula: min(max_delay, base_delay * 2^(attempt-1))
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Delay before retry `attempt` with up to `base_delay` of random jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter_ceiling = self.base_delay.as_millis() as u64;
        self.base_backoff(attempt) + Duration::from_millis(random_jitter_ms(jitter_ceiling))
    }
}

impl Default for ResyncPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// What to do after a stream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDecision {
    /// Reload subscribers and restart the stream after `delay`.
    Retry {
        /// Recovery attempt number (1-based).
        attempt: u32,
        /// How long to wait before restarting.
        delay: Duration,
    },
    /// Stop; mark the kind unavailable.
    GiveUp {
        /// Consecutive failures seen.
        attempts: u32,
    },
}

/// Consecutive-failure counter for one stream.
#[derive(Debug, Clone)]
pub struct StreamRecovery {
    policy: ResyncPolicy,
    failures: u32,
}

impl StreamRecovery {
    /// Create a tracker with no failures recorded.
    pub fn new(policy: ResyncPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// Record a stream failure.
    pub fn on_stream_error(&mut self) -> RecoveryDecision {
        self.failures = self.failures.saturating_add(1);
        if self.failures > self.policy.max_attempts {
            return RecoveryDecision::GiveUp {
                attempts: self.failures,
            };
        }
        RecoveryDecision::Retry {
            attempt: self.failures,
            delay: self.policy.backoff(self.failures),
        }
    }

    /// Record that the stream delivered an event; failures are no longer
    /// consecutive.
    pub fn on_healthy(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Random jitter between 0 and `ceiling` milliseconds (inclusive).
fn random_jitter_ms(ceiling: u64) -> u64 {
    if ceiling == 0 {
        return 0;
    }
    let mut bytes = [0u8; 8];
    match getrandom::getrandom(&mut bytes) {
        Ok(()) => u64::from_le_bytes(bytes) % (ceiling + 1),
        Err(_) => 0,
    }
}
