//! Retry driver for remote calls.
//!
//! [`with_retry`] runs a call through a [`RetryMachine`], sleeping between
//! transient failures through an injectable [`Sleeper`] so tests can record
//! delays instead of waiting for them. Every attempt is logged with its
//! number, elapsed time and classification.

use std::future::Future;
use std::time::{Duration, Instant};

use sdprompt_core::backoff::{BackoffConfig, RetryMachine, RetryState};
use sdprompt_core::remote::{RemoteError, RemoteErrorKind};
use sdprompt_core::types::ImageIndex;

/// Waits between attempts.
#[async_trait::async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait::async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// How often and how patiently a call is retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffConfig) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }
}

/// Final result of a retried call.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, RemoteError>,
    /// Attempts made, the successful one included.
    pub attempts: u32,
    /// Wall-clock time across every attempt and backoff.
    pub elapsed: Duration,
}

/// Bound one call by `timeout`, reporting an overrun as a timeout error.
pub async fn bounded<T, Fut>(timeout: Duration, call: Fut) -> Result<T, RemoteError>
where
    Fut: Future<Output = Result<T, RemoteError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::new(
            RemoteErrorKind::Timeout,
            format!("no response within {}s", timeout.as_secs_f64()),
        )),
    }
}

/// Run `call` until it succeeds, fails permanently, or exhausts
/// `policy.max_attempts`. `call` receives the 1-based attempt number.
///
/// `operation` and `index` only label log lines.
pub async fn with_retry<T, F, Fut>(
    operation: &'static str,
    index: Option<ImageIndex>,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut call: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let started = Instant::now();
    let mut machine = RetryMachine::new(policy.max_attempts, policy.backoff.clone());
    let max_attempts = machine.max_attempts();

    loop {
        let attempt = machine.attempt();
        let attempt_started = Instant::now();
        tracing::debug!(operation, index, attempt, max_attempts, "Starting attempt");

        let err = match call(attempt).await {
            Ok(value) => {
                machine.on_success();
                tracing::info!(
                    operation,
                    index,
                    attempt,
                    max_attempts,
                    elapsed_ms = attempt_started.elapsed().as_millis() as u64,
                    "Attempt succeeded"
                );
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                    elapsed: started.elapsed(),
                };
            }
            Err(err) => err,
        };

        let transient = err.is_transient();
        let elapsed_ms = attempt_started.elapsed().as_millis() as u64;
        match machine.on_failure(transient, err.retry_after, rand::random::<f64>()) {
            RetryState::Backoff { delay, .. } => {
                tracing::warn!(
                    operation,
                    index,
                    attempt,
                    max_attempts,
                    elapsed_ms,
                    kind = %err.kind,
                    transient,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Attempt failed, backing off"
                );
                sleeper.sleep(delay).await;
                machine.resume();
            }
            state => {
                tracing::error!(
                    operation,
                    index,
                    attempt,
                    max_attempts,
                    elapsed_ms,
                    kind = %err.kind,
                    transient,
                    exhausted = matches!(state, RetryState::FailedExhausted { .. }),
                    error = %err,
                    "Attempt failed, giving up"
                );
                return RetryOutcome {
                    result: Err(err),
                    attempts: attempt,
                    elapsed: started.elapsed(),
                };
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
