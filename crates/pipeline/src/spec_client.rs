//! Prompt elaboration into a validated [`GenerationSpec`].

use std::sync::Arc;

use sdprompt_core::backoff::BackoffConfig;
use sdprompt_core::config::EffectiveConfig;
use sdprompt_core::remote::{CompletionRequest, SpecService};
use sdprompt_core::spec::{parse_spec_response, GenerationSpec, SpecError};

use crate::retry::{bounded, with_retry, RetryPolicy, Sleeper};
use crate::template::render_template;

/// Token budget for one elaboration response.
pub const SPEC_MAX_TOKENS: u32 = 1024;

/// Elaborates user prompts through a [`SpecService`].
pub struct SpecClient {
    service: Arc<dyn SpecService>,
    sleeper: Arc<dyn Sleeper>,
    backoff: BackoffConfig,
}

impl SpecClient {
    pub fn new(service: Arc<dyn SpecService>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self::with_backoff(service, sleeper, BackoffConfig::default())
    }

    pub fn with_backoff(
        service: Arc<dyn SpecService>,
        sleeper: Arc<dyn Sleeper>,
        backoff: BackoffConfig,
    ) -> Self {
        Self {
            service,
            sleeper,
            backoff,
        }
    }

    /// The request [`elaborate`](Self::elaborate) sends for `user_prompt`.
    pub fn build_request(user_prompt: &str, config: &EffectiveConfig) -> CompletionRequest {
        CompletionRequest {
            model: config.anthropic.model.clone(),
            prompt: render_template(user_prompt),
            max_tokens: SPEC_MAX_TOKENS,
            timeout: config.timeout,
        }
    }

    /// Render the template, call the service with retries, and validate
    /// the answer. A schema violation is returned as-is and never retried.
    pub async fn elaborate(
        &self,
        user_prompt: &str,
        config: &EffectiveConfig,
    ) -> Result<GenerationSpec, SpecError> {
        let request = Self::build_request(user_prompt, config);
        let policy = RetryPolicy::new(config.retry_attempts, self.backoff.clone());
        let service = self.service.as_ref();

        let outcome = with_retry(
            "elaborate",
            None,
            &policy,
            self.sleeper.as_ref(),
            |_| bounded(request.timeout, service.complete(&request)),
        )
        .await;

        let attempts = outcome.attempts;
        let text = outcome
            .result
            .map_err(|source| SpecError::Remote { source, attempts })?;

        let spec = parse_spec_response(&text)?;
        tracing::info!(
            attempts,
            width = spec.params.width,
            height = spec.params.height,
            steps = spec.params.steps,
            "Generation spec validated"
        );
        Ok(spec)
    }
}
