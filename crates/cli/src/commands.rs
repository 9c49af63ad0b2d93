//! Subcommand handlers. Each returns the process exit code.

use std::io::{IsTerminal as _, Read as _};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;

use sdprompt_anthropic::AnthropicApi;
use sdprompt_core::config::{
    self, export_env, export_yaml, load_env_layer, load_yaml_layer, missing_api_keys,
    ConfigLayer, EffectiveConfig,
};
use sdprompt_pipeline::store::verify_artifact;
use sdprompt_pipeline::{Orchestrator, PipelineError, RunOptions, RunOutcome, SpecSource};
use sdprompt_stability::StabilityApi;

use crate::args::{ExportArgs, ExportFormat, GenerateArgs, GlobalArgs, VerifyArgs};
use crate::{logging, summary};

/// Exit code for fatal errors (config, spec, usage).
pub const EXIT_FATAL: i32 = 1;
/// Exit code when any record fails verification.
pub const EXIT_VERIFY_FAILED: i32 = 2;

// ---------------------------------------------------------------------------
// generate
// ---------------------------------------------------------------------------

pub async fn generate(global: &GlobalArgs, args: GenerateArgs) -> anyhow::Result<i32> {
    let config = match resolve(global, args.settings.to_layer(global)) {
        Ok(config) => config,
        Err(e) => {
            logging::init(global.forced_log_level().unwrap_or(config::DEFAULT_LOG_LEVEL), None)?;
            return Ok(fatal(&PipelineError::from(e)));
        }
    };
    logging::init(&config.log_level, config.log_file.as_deref())?;
    tracing::debug!(config = ?config, "Configuration resolved");

    let source = match &args.metadata {
        Some(record_path) => SpecSource::Replay {
            record_path: record_path.clone(),
        },
        None => SpecSource::Fresh {
            user_prompt: read_prompt(args.input.as_deref())?,
        },
    };
    let options = RunOptions {
        seed_override: args.seed,
        model_override: args.model_override,
        dry_run: args.dry_run,
    };

    let orchestrator = Orchestrator::new(
        Arc::new(AnthropicApi::new(
            config.anthropic.base_url.clone(),
            config.anthropic.api_key.clone(),
        )),
        Arc::new(StabilityApi::new(
            config.stability.base_url.clone(),
            config.stability.api_key.clone(),
        )),
    );

    match orchestrator.run(source, options, Arc::new(config)).await {
        Ok(RunOutcome::Completed(report)) => {
            print!("{}", summary::run_report(&report));
            Ok(report.status.exit_code())
        }
        Ok(RunOutcome::DryRun(report)) => {
            print!("{}", summary::dry_run_report(&report));
            Ok(0)
        }
        Err(e) => Ok(fatal(&e)),
    }
}

fn resolve(global: &GlobalArgs, cli: ConfigLayer) -> Result<EffectiveConfig, config::ConfigError> {
    config::resolve(cli, global.env.as_deref(), global.config.as_deref())
}

/// Read the prompt from `input`, or from stdin when it is piped.
fn read_prompt(input: Option<&Path>) -> anyhow::Result<String> {
    if let Some(path) = input {
        return std::fs::read_to_string(path)
            .with_context(|| format!("read prompt from '{}'", path.display()));
    }
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        // An empty prompt is reported as a usage error by the pipeline.
        return Ok(String::new());
    }
    let mut prompt = String::new();
    stdin
        .read_to_string(&mut prompt)
        .context("read prompt from stdin")?;
    Ok(prompt)
}

fn fatal(err: &PipelineError) -> i32 {
    tracing::error!(error = %err, "Run aborted");
    eprintln!("error: {err}");
    eprintln!("hint: {}", err.hint());
    EXIT_FATAL
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

/// Merge CLI, environment and YAML layers without validating them and
/// write the result as a `.env` or YAML body.
pub fn export_config(global: &GlobalArgs, args: ExportArgs) -> anyhow::Result<i32> {
    logging::init(global.forced_log_level().unwrap_or(config::DEFAULT_LOG_LEVEL), None)?;

    let env = load_env_layer(global.env.as_deref(), std::env::vars());
    let yaml = load_yaml_layer(global.config.as_deref());
    let (env, yaml) = match (env, yaml) {
        (Ok(env), Ok(yaml)) => (env, yaml),
        (Err(e), _) | (_, Err(e)) => return Ok(fatal(&PipelineError::from(e))),
    };
    let merged = args.to_layer(global).merge(env).merge(yaml);

    let body = match args.export {
        ExportFormat::Env => export_env(&merged),
        ExportFormat::Yaml => export_yaml(&merged).context("serialize configuration")?,
    };

    match &args.output {
        Some(path) => {
            std::fs::write(path, &body)
                .with_context(|| format!("write configuration to '{}'", path.display()))?;
            eprintln!("wrote {}", path.display());
        }
        None => print!("{body}"),
    }

    let missing = missing_api_keys(&merged);
    if !missing.is_empty() {
        eprintln!("note: add {} before generating", missing.join(" and "));
    }
    Ok(0)
}

// ---------------------------------------------------------------------------
// verify
// ---------------------------------------------------------------------------

pub async fn verify(global: &GlobalArgs, args: VerifyArgs) -> anyhow::Result<i32> {
    logging::init(global.forced_log_level().unwrap_or(config::DEFAULT_LOG_LEVEL), None)?;

    let mut failures = 0usize;
    for record in &args.records {
        match verify_artifact(record).await {
            Ok(report) => println!("{}", summary::verified(&report)),
            Err(e) => {
                failures += 1;
                tracing::warn!(record = %record.display(), error = %e, "Verification failed");
                println!("FAILED {}: {e}; hint: {}", record.display(), e.hint());
            }
        }
    }
    Ok(if failures == 0 { 0 } else { EXIT_VERIFY_FAILED })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
