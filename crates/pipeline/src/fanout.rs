//! Bounded fan-out of render requests.
//!
//! [`FanoutController::generate_all`] returns exactly one [`RenderResult`]
//! per requested index, ordered by index, whatever order the renders
//! finished in. Without `continue_on_error` the first failure stops
//! dispatching; every index that was never started comes back as
//! [`RenderOutcome::Skipped`](crate::render_client::RenderOutcome::Skipped).
//! A render that panics is reported as an `internal` failure and stops
//! dispatching like any other failure.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use sdprompt_core::config::EffectiveConfig;
use sdprompt_core::spec::GenerationSpec;
use sdprompt_core::types::ImageIndex;

use crate::render_client::{RenderClient, RenderOverrides, RenderRequest, RenderResult};

/// Runs the renders of one run under the configured concurrency.
pub struct FanoutController {
    client: Arc<RenderClient>,
}

impl FanoutController {
    pub fn new(client: Arc<RenderClient>) -> Self {
        Self { client }
    }

    /// Render `count` images from `spec`.
    pub async fn generate_all(
        &self,
        spec: Arc<GenerationSpec>,
        count: u32,
        overrides: &RenderOverrides,
        config: Arc<EffectiveConfig>,
    ) -> Vec<RenderResult> {
        let requests: Vec<RenderRequest> = (1..=count)
            .map(|index| RenderRequest::new(&spec, index, overrides, &config))
            .collect();

        tracing::info!(
            count,
            parallel = config.parallel,
            workers = config.concurrency(),
            continue_on_error = config.continue_on_error,
            "Starting fan-out"
        );

        let slots = if config.parallel {
            self.run_parallel(&requests, config).await
        } else {
            self.run_sequential(&requests, config).await
        };

        requests
            .iter()
            .zip(slots)
            .map(|(request, slot)| slot.unwrap_or_else(|| RenderResult::skipped(request)))
            .collect()
    }

    async fn run_sequential(
        &self,
        requests: &[RenderRequest],
        config: Arc<EffectiveConfig>,
    ) -> Vec<Option<RenderResult>> {
        let mut slots: Vec<Option<RenderResult>> = vec![None; requests.len()];
        for (slot, request) in slots.iter_mut().zip(requests) {
            let result =
                render_guarded(Arc::clone(&self.client), request.clone(), Arc::clone(&config)).await;
            let failed = result.is_failure();
            *slot = Some(result);
            if failed && !config.continue_on_error {
                tracing::warn!(index = request.index, "Render failed, skipping remaining images");
                break;
            }
        }
        slots
    }

    /// A permit is taken before each task is spawned and released when it
    /// finishes, so a failing task cancels `stop` before the dispatcher can
    /// start the next index.
    async fn run_parallel(
        &self,
        requests: &[RenderRequest],
        config: Arc<EffectiveConfig>,
    ) -> Vec<Option<RenderResult>> {
        let semaphore = Arc::new(Semaphore::new(config.concurrency()));
        let stop = CancellationToken::new();
        let mut tasks = JoinSet::new();

        for request in requests {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                tracing::error!("Worker semaphore closed, stopping dispatch");
                break;
            };
            if stop.is_cancelled() {
                tracing::warn!(
                    index = request.index,
                    "Earlier render failed, skipping remaining images"
                );
                break;
            }

            let client = Arc::clone(&self.client);
            let config = Arc::clone(&config);
            let stop = stop.clone();
            let request = request.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let result = render_guarded(client, request, Arc::clone(&config)).await;
                if result.is_failure() && !config.continue_on_error {
                    stop.cancel();
                }
                result
            });
        }

        let mut slots: Vec<Option<RenderResult>> = vec![None; requests.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    if let Some(slot) = slot_for(&mut slots, result.index) {
                        *slot = Some(result);
                    }
                }
                // Only reachable if the worker itself panics after the render.
                Err(e) => tracing::error!(error = %e, "Render task aborted"),
            }
        }
        slots
    }
}

/// Render on its own task so a panic in the service surfaces as a
/// failed result instead of a lost slot.
async fn render_guarded(
    client: Arc<RenderClient>,
    request: RenderRequest,
    config: Arc<EffectiveConfig>,
) -> RenderResult {
    let index = request.index;
    let fallback = request.clone();
    let joined = tokio::spawn(async move { client.render(&request, &config).await }).await;
    match joined {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(index, error = %e, "Render task panicked");
            RenderResult::crashed(&fallback, &e.to_string())
        }
    }
}

fn slot_for(slots: &mut [Option<RenderResult>], index: ImageIndex) -> Option<&mut Option<RenderResult>> {
    let position = usize::try_from(index).ok()?.checked_sub(1)?;
    slots.get_mut(position)
}
