//! Single-image rendering with retries.

use std::sync::Arc;
use std::time::Duration;

use sdprompt_core::backoff::BackoffConfig;
use sdprompt_core::config::EffectiveConfig;
use sdprompt_core::remote::{ImageRequest, ImageService, RemoteError, RemoteErrorKind};
use sdprompt_core::spec::GenerationSpec;
use sdprompt_core::types::ImageIndex;

use crate::retry::{bounded, with_retry, RetryPolicy, Sleeper};

/// Invocation-time overrides applied to every render of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOverrides {
    pub seed: Option<u64>,
    pub model: Option<String>,
}

/// One concrete render derived from the spec.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    /// 1-based position in the fan-out.
    pub index: ImageIndex,
    pub image: ImageRequest,
}

impl RenderRequest {
    /// The seed is the override if given, else the spec seed, else left
    /// to the service. The model is the override if given, else the
    /// configured image model.
    pub fn new(
        spec: &GenerationSpec,
        index: ImageIndex,
        overrides: &RenderOverrides,
        config: &EffectiveConfig,
    ) -> Self {
        let params = &spec.params;
        Self {
            index,
            image: ImageRequest {
                index,
                model: overrides
                    .model
                    .clone()
                    .unwrap_or_else(|| config.stability.model.clone()),
                prompt: spec.prompt.clone(),
                negative_prompt: spec.negative_prompt.clone(),
                width: params.width,
                height: params.height,
                cfg_scale: params.cfg_scale,
                steps: params.steps,
                seed: overrides.seed.or(params.seed),
                timeout: config.timeout,
            },
        }
    }
}

/// How a render ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    Success { bytes: Vec<u8>, seed: u64 },
    Failure { error: RemoteError },
    /// Never dispatched because an earlier render failed.
    Skipped,
}

/// Outcome of one [`RenderRequest`], with bookkeeping for the record.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderResult {
    pub index: ImageIndex,
    /// Model the request was sent to.
    pub model: String,
    /// Seed that was requested, if any.
    pub requested_seed: Option<u64>,
    pub attempts: u32,
    pub elapsed: Duration,
    pub outcome: RenderOutcome,
}

impl RenderResult {
    pub fn skipped(request: &RenderRequest) -> Self {
        Self {
            index: request.index,
            model: request.image.model.clone(),
            requested_seed: request.image.seed,
            attempts: 0,
            elapsed: Duration::ZERO,
            outcome: RenderOutcome::Skipped,
        }
    }

    /// A render whose task died without returning a result.
    pub fn crashed(request: &RenderRequest, reason: &str) -> Self {
        Self {
            attempts: 1,
            outcome: RenderOutcome::Failure {
                error: RemoteError::new(
                    RemoteErrorKind::Internal,
                    format!("render task failed: {reason}"),
                ),
            },
            ..Self::skipped(request)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RenderOutcome::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, RenderOutcome::Failure { .. })
    }
}

/// Issues render requests against an [`ImageService`].
pub struct RenderClient {
    service: Arc<dyn ImageService>,
    sleeper: Arc<dyn Sleeper>,
    backoff: BackoffConfig,
}

impl RenderClient {
    pub fn new(service: Arc<dyn ImageService>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self::with_backoff(service, sleeper, BackoffConfig::default())
    }

    pub fn with_backoff(
        service: Arc<dyn ImageService>,
        sleeper: Arc<dyn Sleeper>,
        backoff: BackoffConfig,
    ) -> Self {
        Self {
            service,
            sleeper,
            backoff,
        }
    }

    /// Render one image, retrying transient failures up to
    /// `config.retry_attempts` attempts in total. Never fails: errors are
    /// carried in the returned [`RenderResult`].
    pub async fn render(&self, request: &RenderRequest, config: &EffectiveConfig) -> RenderResult {
        let policy = RetryPolicy::new(config.retry_attempts, self.backoff.clone());
        let service = self.service.as_ref();
        let image = &request.image;

        let outcome = with_retry(
            "render",
            Some(request.index),
            &policy,
            self.sleeper.as_ref(),
            |_| bounded(image.timeout, service.generate(image)),
        )
        .await;

        let outcome_kind = match outcome.result {
            Ok(generated) => RenderOutcome::Success {
                bytes: generated.bytes,
                seed: generated.seed,
            },
            Err(error) => RenderOutcome::Failure { error },
        };

        RenderResult {
            index: request.index,
            model: image.model.clone(),
            requested_seed: image.seed,
            attempts: outcome.attempts,
            elapsed: outcome.elapsed,
            outcome: outcome_kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
