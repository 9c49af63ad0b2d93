//! Exponential-backoff policy and the retry state machine.
//!
//! A remote call is driven through [`RetryMachine`]: every attempt ends in
//! either [`RetryMachine::on_success`] or [`RetryMachine::on_failure`], and
//! the returned [`RetryState`] tells the driver whether to sleep and try
//! again or stop. The machine itself never sleeps, so the driver can inject
//! any clock it likes.

use std::time::Duration;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on the computed delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Maximum fraction of the delay added as random jitter (`0.0` disables).
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl BackoffConfig {
    /// A policy with no jitter, for deterministic schedules.
    pub fn without_jitter() -> Self {
        Self {
            jitter: 0.0,
            ..Self::default()
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`BackoffConfig::max_delay`].
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Un-jittered delay to wait after the `failed_attempt`-th attempt failed
/// (1-based): `initial`, `initial * m`, `initial * m^2`, ... capped.
pub fn delay_after_attempt(failed_attempt: u32, config: &BackoffConfig) -> Duration {
    let mut delay = config.initial_delay.min(config.max_delay);
    for _ in 1..failed_attempt {
        delay = next_delay(delay, config);
        if delay == config.max_delay {
            break;
        }
    }
    delay
}

/// Add jitter to `delay`.
///
/// `sample` is a uniform random number in `[0, 1)`; the added amount is
/// `delay * jitter * sample`. Jitter may push the delay past `max_delay`.
pub fn apply_jitter(delay: Duration, jitter: f64, sample: f64) -> Duration {
    let fraction = jitter.max(0.0) * sample.clamp(0.0, 1.0);
    delay + delay.mul_f64(fraction)
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Where a retried call currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// About to make attempt number `attempt` (1-based).
    Attempting { attempt: u32 },
    /// Attempt `attempt` failed transiently; wait `delay` before the next one.
    Backoff { attempt: u32, delay: Duration },
    /// Attempt `attempts` succeeded.
    Succeeded { attempts: u32 },
    /// A permanent failure ended the call after `attempts` attempts.
    FailedPermanent { attempts: u32 },
    /// Every allowed attempt failed transiently.
    FailedExhausted { attempts: u32 },
}

impl RetryState {
    /// Whether no further attempts will be made.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::FailedPermanent { .. } | Self::FailedExhausted { .. }
        )
    }
}

/// Drives one call through at most `max_attempts` attempts.
#[derive(Debug, Clone)]
pub struct RetryMachine {
    max_attempts: u32,
    config: BackoffConfig,
    state: RetryState,
}

impl RetryMachine {
    /// `max_attempts` counts the first attempt; values below 1 are raised to 1.
    pub fn new(max_attempts: u32, config: BackoffConfig) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            config,
            state: RetryState::Attempting { attempt: 1 },
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Attempt number currently in flight (or the last one made).
    pub fn attempt(&self) -> u32 {
        match self.state {
            RetryState::Attempting { attempt } | RetryState::Backoff { attempt, .. } => attempt,
            RetryState::Succeeded { attempts }
            | RetryState::FailedPermanent { attempts }
            | RetryState::FailedExhausted { attempts } => attempts,
        }
    }

    /// Record that the in-flight attempt succeeded.
    pub fn on_success(&mut self) -> RetryState {
        self.state = RetryState::Succeeded {
            attempts: self.attempt(),
        };
        self.state
    }

    /// Record that the in-flight attempt failed.
    ///
    /// A server `retry_after` hint replaces the computed (jittered) delay
    /// and is capped at `max_delay`. `jitter_sample` must be uniform in
    /// `[0, 1)`.
    pub fn on_failure(
        &mut self,
        transient: bool,
        retry_after: Option<Duration>,
        jitter_sample: f64,
    ) -> RetryState {
        let attempt = self.attempt();
        self.state = if !transient {
            RetryState::FailedPermanent { attempts: attempt }
        } else if attempt >= self.max_attempts {
            RetryState::FailedExhausted { attempts: attempt }
        } else {
            let delay = match retry_after {
                Some(hint) => hint.min(self.config.max_delay),
                None => apply_jitter(
                    delay_after_attempt(attempt, &self.config),
                    self.config.jitter,
                    jitter_sample,
                ),
            };
            RetryState::Backoff { attempt, delay }
        };
        self.state
    }

    /// Leave `Backoff` and start the next attempt.
    ///
    /// Has no effect in any other state.
    pub fn resume(&mut self) -> RetryState {
        if let RetryState::Backoff { attempt, .. } = self.state {
            self.state = RetryState::Attempting {
                attempt: attempt + 1,
            };
        }
        self.state
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
