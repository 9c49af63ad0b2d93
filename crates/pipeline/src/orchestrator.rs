//! Run sequencing: spec, fan-out, persistence.
//!
//! A run starts from a [`SpecSource`]. Fresh runs elaborate the user prompt
//! through the [`SpecClient`]; replays rebuild the spec from a saved record
//! and never call the language model. Both resolve to a [`ResolvedSpec`]
//! and continue through the same fan-out and store steps.

use std::path::PathBuf;
use std::sync::Arc;

use sdprompt_core::backoff::BackoffConfig;
use sdprompt_core::config::EffectiveConfig;
use sdprompt_core::remote::{ImageService, RemoteErrorKind, SpecService};
use sdprompt_core::spec::{GenerationSpec, MAX_SEED};
use sdprompt_core::types::ImageIndex;

use crate::error::PipelineError;
use crate::fanout::FanoutController;
use crate::render_client::{RenderClient, RenderOutcome, RenderOverrides, RenderResult};
use crate::retry::{Sleeper, TokioSleeper};
use crate::spec_client::SpecClient;
use crate::store::{load_spec_from_record, Provenance, VerificationStore};
use crate::template::render_template;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Where the run's spec comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecSource {
    Fresh { user_prompt: String },
    Replay { record_path: PathBuf },
}

/// Invocation options that are not part of the configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    pub seed_override: Option<u64>,
    pub model_override: Option<String>,
    /// Validate and render the template without calling any service.
    pub dry_run: bool,
}

/// A spec ready for fan-out, tagged with how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedSpec {
    FreshSpec {
        spec: GenerationSpec,
        provenance: Provenance,
        overrides: RenderOverrides,
    },
    ReplayedSpec {
        spec: GenerationSpec,
        provenance: Provenance,
        overrides: RenderOverrides,
    },
}

impl ResolvedSpec {
    fn into_parts(self) -> (GenerationSpec, Provenance, RenderOverrides) {
        match self {
            Self::FreshSpec {
                spec,
                provenance,
                overrides,
            }
            | Self::ReplayedSpec {
                spec,
                provenance,
                overrides,
                ..
            } => (spec, provenance, overrides),
        }
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// Overall result of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    TotalSuccess,
    PartialSuccess,
    TotalFailure,
}

impl RunStatus {
    /// Process exit code for this status. Fatal errors exit with 1.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::TotalSuccess => 0,
            Self::TotalFailure => 2,
            Self::PartialSuccess => 3,
        }
    }

    fn from_counts(succeeded: usize, total: usize) -> Self {
        if total > 0 && succeeded == total {
            Self::TotalSuccess
        } else if succeeded == 0 {
            Self::TotalFailure
        } else {
            Self::PartialSuccess
        }
    }
}

/// What happened to one requested image.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Stored {
        image_path: PathBuf,
        record_path: PathBuf,
        checksum_sha256: String,
    },
    RenderFailed {
        kind: RemoteErrorKind,
        message: String,
        hint: &'static str,
        /// Absent when the failure record itself could not be written.
        record_path: Option<PathBuf>,
    },
    PersistFailed {
        message: String,
        hint: &'static str,
    },
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemReport {
    pub index: ImageIndex,
    pub attempts: u32,
    pub outcome: ItemOutcome,
}

impl ItemReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Stored { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: String,
    pub output_dir: PathBuf,
    pub items: Vec<ItemReport>,
    pub status: RunStatus,
}

/// What a dry run validated.
#[derive(Debug, Clone, PartialEq)]
pub enum DryRunReport {
    /// Config is valid and the template rendered; no service was called.
    Fresh { rendered_prompt: String, count: u32 },
    /// The record loaded and its spec passed validation.
    Replay { spec: GenerationSpec, count: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunReport),
    DryRun(DryRunReport),
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    spec_client: SpecClient,
    fanout: FanoutController,
}

impl Orchestrator {
    /// Build the pipeline around the two collaborators, sleeping on the
    /// tokio timer between retries.
    pub fn new(spec_service: Arc<dyn SpecService>, image_service: Arc<dyn ImageService>) -> Self {
        Self::with_sleeper(
            spec_service,
            image_service,
            Arc::new(TokioSleeper),
            BackoffConfig::default(),
        )
    }

    pub fn with_sleeper(
        spec_service: Arc<dyn SpecService>,
        image_service: Arc<dyn ImageService>,
        sleeper: Arc<dyn Sleeper>,
        backoff: BackoffConfig,
    ) -> Self {
        let spec_client =
            SpecClient::with_backoff(spec_service, Arc::clone(&sleeper), backoff.clone());
        let render_client = RenderClient::with_backoff(image_service, sleeper, backoff);
        Self {
            spec_client,
            fanout: FanoutController::new(Arc::new(render_client)),
        }
    }

    /// Execute one run.
    ///
    /// Config, spec and replay-loading failures abort with an error before
    /// any image is rendered. Per-image failures are reported in the
    /// returned [`RunReport`].
    pub async fn run(
        &self,
        source: SpecSource,
        options: RunOptions,
        config: Arc<EffectiveConfig>,
    ) -> Result<RunOutcome, PipelineError> {
        if let SpecSource::Fresh { user_prompt } = &source {
            if user_prompt.trim().is_empty() {
                return Err(PipelineError::Usage("prompt is empty".to_string()));
            }
        }
        if let Some(seed) = options.seed_override.filter(|s| *s > MAX_SEED) {
            return Err(PipelineError::Usage(format!(
                "seed {seed} is out of range (0..={MAX_SEED})"
            )));
        }

        if options.dry_run {
            return self.dry_run(source, &options, &config).await;
        }

        let run_id = uuid::Uuid::now_v7().to_string();
        tracing::info!(run_id = %run_id, count = config.count, "Starting run");

        let resolved = self.resolve_spec(source, &options, &config, &run_id).await?;
        let (spec, provenance, overrides) = resolved.into_parts();
        let spec = Arc::new(spec);

        let results = self
            .fanout
            .generate_all(Arc::clone(&spec), config.count, &overrides, Arc::clone(&config))
            .await;

        let run_dir = config.output_dir.join(&run_id);
        let store = VerificationStore::new(run_dir.clone(), config.format, provenance);
        let mut items = Vec::with_capacity(results.len());
        for result in &results {
            items.push(persist_item(&store, result, &spec).await);
        }

        let succeeded = items.iter().filter(|i| i.is_success()).count();
        let status = RunStatus::from_counts(succeeded, items.len());
        tracing::info!(
            run_id = %run_id,
            succeeded,
            total = items.len(),
            status = ?status,
            "Run finished"
        );

        Ok(RunOutcome::Completed(RunReport {
            run_id,
            output_dir: run_dir,
            items,
            status,
        }))
    }

    /// Turn the source into a spec. The two variants never share a branch
    /// after this point.
    async fn resolve_spec(
        &self,
        source: SpecSource,
        options: &RunOptions,
        config: &EffectiveConfig,
        run_id: &str,
    ) -> Result<ResolvedSpec, PipelineError> {
        match source {
            SpecSource::Fresh { user_prompt } => {
                let spec = self.spec_client.elaborate(&user_prompt, config).await?;
                Ok(ResolvedSpec::FreshSpec {
                    spec,
                    provenance: Provenance {
                        run_id: run_id.to_string(),
                        original_prompt: user_prompt,
                        spec_model: config.anthropic.model.clone(),
                    },
                    overrides: RenderOverrides {
                        seed: options.seed_override,
                        model: options.model_override.clone(),
                    },
                })
            }
            SpecSource::Replay { record_path } => {
                let replayed = load_spec_from_record(
                    &record_path,
                    options.seed_override,
                    options.model_override.clone(),
                )
                .await?;
                Ok(ResolvedSpec::ReplayedSpec {
                    provenance: Provenance {
                        run_id: run_id.to_string(),
                        original_prompt: replayed.record.original_prompt.clone(),
                        spec_model: replayed.record.model_info.anthropic.model.clone(),
                    },
                    overrides: RenderOverrides {
                        seed: options.seed_override,
                        model: Some(replayed.model),
                    },
                    spec: replayed.spec,
                })
            }
        }
    }

    async fn dry_run(
        &self,
        source: SpecSource,
        options: &RunOptions,
        config: &EffectiveConfig,
    ) -> Result<RunOutcome, PipelineError> {
        let report = match source {
            SpecSource::Fresh { user_prompt } => DryRunReport::Fresh {
                rendered_prompt: render_template(&user_prompt),
                count: config.count,
            },
            SpecSource::Replay { record_path } => {
                let replayed = load_spec_from_record(
                    &record_path,
                    options.seed_override,
                    options.model_override.clone(),
                )
                .await?;
                DryRunReport::Replay {
                    spec: replayed.spec,
                    count: config.count,
                }
            }
        };
        tracing::info!("Dry run complete, no remote calls made");
        Ok(RunOutcome::DryRun(report))
    }
}

async fn persist_item(
    store: &VerificationStore,
    result: &RenderResult,
    spec: &GenerationSpec,
) -> ItemReport {
    let persisted = store.persist(result, spec).await;
    let outcome = match (&result.outcome, persisted) {
        (RenderOutcome::Skipped, _) => ItemOutcome::Skipped,
        (RenderOutcome::Success { .. }, Ok(Some(stored))) => match (
            stored.image_path,
            stored.record.image_verification,
        ) {
            (Some(image_path), Some(verification)) => ItemOutcome::Stored {
                image_path,
                record_path: stored.record_path,
                checksum_sha256: verification.checksum_sha256,
            },
            _ => ItemOutcome::PersistFailed {
                message: "image was not written".to_string(),
                hint: "check that the output directory is writable",
            },
        },
        (RenderOutcome::Failure { error }, persisted) => {
            let record_path = match persisted {
                Ok(stored) => stored.map(|s| s.record_path),
                Err(e) => {
                    tracing::error!(index = result.index, error = %e, "Failed to write failure record");
                    None
                }
            };
            ItemOutcome::RenderFailed {
                kind: error.kind,
                message: error.message.clone(),
                hint: error.hint(),
                record_path,
            }
        }
        (RenderOutcome::Success { .. }, Ok(None)) => ItemOutcome::PersistFailed {
            message: "nothing was stored".to_string(),
            hint: "report this as a bug",
        },
        (RenderOutcome::Success { .. }, Err(e)) => {
            tracing::error!(index = result.index, error = %e, "Failed to persist artifact");
            ItemOutcome::PersistFailed {
                message: e.to_string(),
                hint: e.hint(),
            }
        }
    };

    ItemReport {
        index: result.index,
        attempts: result.attempts,
        outcome,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
