//! Reconnection delays
//!
//! Exponential growth without jitter, capped, and never giving up: a binding
//! keeps retrying until its broker comes back.

use crate::config::BackoffConfig;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::time::Duration;

/// Per-component delay sequence
#[derive(Debug)]
pub struct ReconnectBackoff {
    inner: ExponentialBackoff,
    max_interval: Duration,
    attempts: u32,
}

impl ReconnectBackoff {
    pub fn new(config: &BackoffConfig) -> Self {
        let inner = ExponentialBackoff {
            current_interval: config.initial_interval(),
            initial_interval: config.initial_interval(),
            randomization_factor: 0.0,
            multiplier: config.multiplier,
            max_interval: config.max_interval(),
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };
        Self {
            inner,
            max_interval: config.max_interval(),
            attempts: 0,
        }
    }

    /// Delay before the next attempt. Grows on every call until the cap.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        self.inner
            .next_backoff()
            .unwrap_or(self.max_interval)
            .min(self.max_interval)
    }

    /// Start over after a successful attempt
    pub fn reset(&mut self) {
        self.inner.reset();
        self.attempts = 0;
    }

    /// Consecutive failed attempts since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
