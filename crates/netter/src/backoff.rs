//! Truncated exponential backoff for transient accept failures.

use std::time::Duration;

/// Delay before the first retry.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(5);

/// Upper bound on any single delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(1);

/// How an accept loop paces retries after transient errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// First delay. Each consecutive transient error doubles it.
    pub initial: Duration,
    /// Cap on a single delay.
    pub max: Duration,
    /// Consecutive transient errors tolerated before giving up.
    ///
    /// `None` (the default) retries for as long as errors stay transient.
    pub max_retries: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: DEFAULT_INITIAL_BACKOFF,
            max: DEFAULT_MAX_BACKOFF,
            max_retries: None,
        }
    }
}

/// Backoff state for one run of consecutive transient errors.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
    current: Duration,
}

impl Backoff {
    /// Creates backoff state with no retries handed out yet. The first
    /// call to [`next_delay`](Self::next_delay) returns `config.initial`.
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: 0,
            current: Duration::ZERO,
        }
    }

    /// Returns how long to wait before the next retry, or `None` once the
    /// retry ceiling (if any) is reached.
    ///
    /// Delays run `initial, 2*initial, 4*initial, ...` and never exceed
    /// `max`.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(limit) = self.config.max_retries {
            if self.attempts >= limit {
                return None;
            }
        }

        let next = if self.current.is_zero() {
            self.config.initial
        } else {
            self.current.saturating_mul(2)
        };
        self.current = next.min(self.config.max);
        self.attempts = self.attempts.saturating_add(1);
        Some(self.current)
    }

    /// Starts over from `initial`. Called after any non-transient outcome.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current = Duration::ZERO;
    }

    /// Retries handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
