//! Backoff and retry policies for flag polling.
//!
//! Normal handshake waits use an unbounded policy: a slow peer throttles the
//! other side. Only the stop path uses a bounded policy, and running out of
//! attempts there is reported rather than treated as a crash.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RoomflowError};

/// Number of polls the stop path performs before giving up.
pub const DEFAULT_STOP_ATTEMPTS: u32 = 10_000;

/// Interval between stop polls.
pub const DEFAULT_STOP_INTERVAL: Duration = Duration::from_millis(10);

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// Fixed delay between retries.
    Fixed(Duration),
    /// Exponential backoff (delay * multiplier^attempt).
    Exponential {
        /// Initial delay.
        initial: Duration,
        /// Maximum delay.
        max: Duration,
        /// Multiplier, at least 1.
        multiplier: f64,
    },
}

impl BackoffStrategy {
    /// Delay for the given attempt number (0-indexed).
    ///
    /// A negative or non-finite factor saturates at `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(d) => *d,
            BackoffStrategy::Exponential {
                initial,
                max,
                multiplier,
            } => {
                // Cap the exponent so the float never overflows into inf.
                let factor = multiplier.powi(attempt.min(64) as i32);
                if !factor.is_finite()
                    || factor < 0.0
                    || initial.as_secs_f64() * factor >= max.as_secs_f64()
                {
                    return *max;
                }
                initial.mul_f64(factor).min(*max)
            }
        }
    }

    fn validate(&self, what: &str) -> Result<()> {
        if let BackoffStrategy::Exponential { multiplier, .. } = self {
            if !(multiplier.is_finite() && *multiplier >= 1.0) {
                return Err(RoomflowError::config(format!(
                    "{what} backoff multiplier must be a finite value >= 1, got {multiplier}"
                )));
            }
        }
        Ok(())
    }
}

/// How long a polling loop keeps trying.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of polls; `None` waits forever.
    pub max_attempts: Option<u32>,
    /// Sleep between polls.
    pub backoff: BackoffStrategy,
}

impl RetryPolicy {
    /// Bounded policy with a fixed backoff.
    pub fn bounded(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff: BackoffStrategy::Fixed(interval),
        }
    }

    /// Unbounded policy used for the normal handshake.
    ///
    /// Starts at 50 µs and backs off to 10 ms so a peer inside a long solve
    /// does not cost a spinning core.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            backoff: BackoffStrategy::Exponential {
                initial: Duration::from_micros(50),
                max: Duration::from_millis(10),
                multiplier: 2.0,
            },
        }
    }

    /// Stop-path policy: 10000 polls at 10 ms.
    pub fn shutdown() -> Self {
        Self::bounded(DEFAULT_STOP_ATTEMPTS, DEFAULT_STOP_INTERVAL)
    }

    /// Set backoff strategy.
    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Whether another poll is allowed after `attempt` polls.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }

    /// Delay before the next poll.
    pub fn get_delay(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    /// Check a policy that must terminate, such as the stop path.
    ///
    /// `what` names the policy in the error message.
    pub fn validate_bounded(&self, what: &str) -> Result<()> {
        if self.max_attempts.is_none() {
            return Err(RoomflowError::config(format!("{what} needs max_attempts")));
        }
        self.backoff.validate(what)
    }

    /// Upper bound on total waiting time, if bounded.
    pub fn budget(&self) -> Option<Duration> {
        self.max_attempts
            .map(|max| (0..max).map(|a| self.get_delay(a)).sum())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}
