//! Reconnect policy.
//!
//! Decides after every connect failure or disconnect whether another attempt
//! is made and how long to wait first. The attempt counter only resets when
//! the session becomes ready.

use std::fmt;
use std::time::Duration;

use crate::config::{Retries, SessionConfig};

/// Computes the delay before a reconnect attempt.
pub trait Backoff: Send + 'static {
    /// Delay before attempt number `attempt` (1-indexed).
    fn delay(&self, attempt: u32) -> Duration;
}

/// The same delay before every attempt.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

impl Backoff for FixedDelay {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// Doubling delay starting at `base`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Outcome of consulting the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { attempt: u32, delay: Duration },
    GiveUp,
}

pub struct ReconnectPolicy {
    enabled: bool,
    max_retries: Retries,
    backoff: Box<dyn Backoff>,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(enabled: bool, max_retries: Retries, backoff: Box<dyn Backoff>) -> Self {
        Self {
            enabled,
            max_retries,
            backoff,
            attempt: 0,
        }
    }

    /// Policy with the configured fixed delay.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            config.retry_enabled,
            config.max_retries,
            Box::new(FixedDelay(config.reconnect_delay())),
        )
    }

    /// Decide on the next attempt, advancing the counter when retrying.
    pub fn next_attempt(&mut self) -> Decision {
        if !self.enabled {
            return Decision::GiveUp;
        }
        if let Retries::Limited(max) = self.max_retries
            && self.attempt >= max
        {
            return Decision::GiveUp;
        }

        self.attempt = self.attempt.saturating_add(1);
        Decision::Retry {
            attempt: self.attempt,
            delay: self.backoff.delay(self.attempt),
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl fmt::Debug for ReconnectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectPolicy")
            .field("enabled", &self.enabled)
            .field("max_retries", &self.max_retries)
            .field("attempt", &self.attempt)
            .finish()
    }
}
