//! Command-line surface.
//!
//! Flags that map onto configuration fields are all optional so that an
//! unset flag leaves the environment or YAML value in place.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use sdprompt_core::config::{ConfigLayer, ImageFormat};
use sdprompt_core::spec::MAX_SEED;

#[derive(Parser, Debug)]
#[command(name = "sdprompt", version, about = "Turn a prompt into verified, reproducible images")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// YAML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Dotenv file (defaults to ./.env when present).
    #[arg(long, global = true)]
    pub env: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log at trace level.
    #[arg(long, global = true)]
    pub debug: bool,

    /// Also write logs to this file.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Elaborate a prompt and render images, or replay a saved record.
    Generate(GenerateArgs),
    /// Export the merged configuration as a .env or YAML file.
    Config(ExportArgs),
    /// Re-check images against their metadata records.
    Verify(VerifyArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct GenerateArgs {
    /// Read the prompt from this file instead of stdin.
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Replay the spec stored in this metadata record.
    #[arg(short, long, conflicts_with = "input")]
    pub metadata: Option<PathBuf>,

    /// Seed sent with every render (0..=4294967295).
    #[arg(long, value_parser = clap::value_parser!(u64).range(..=MAX_SEED))]
    pub seed: Option<u64>,

    /// Image model for this run only, replacing the configured or recorded one.
    #[arg(long)]
    pub model_override: Option<String>,

    /// Validate config and render the template without calling any service.
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub settings: SettingsArgs,
}

/// Flags that override configuration fields.
#[derive(Args, Debug, Clone, Default)]
pub struct SettingsArgs {
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// png, jpeg or webp.
    #[arg(short, long)]
    pub format: Option<ImageFormat>,

    /// Number of images to render.
    #[arg(short = 'n', long)]
    pub count: Option<u32>,

    #[arg(long)]
    pub anthropic_model: Option<String>,

    #[arg(long)]
    pub stability_model: Option<String>,

    /// Per-call timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Total attempts per remote call.
    #[arg(long)]
    pub retry_attempts: Option<u32>,

    /// Render images concurrently.
    #[arg(long)]
    pub parallel: bool,

    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Keep rendering after an image fails.
    #[arg(long)]
    pub continue_on_error: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    #[arg(long, value_enum, default_value_t = ExportFormat::Env)]
    pub export: ExportFormat,

    /// Write to this file instead of stdout.
    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub anthropic_api_key: Option<String>,

    #[arg(long)]
    pub stability_api_key: Option<String>,

    #[command(flatten)]
    pub settings: SettingsArgs,
}

impl ExportArgs {
    /// Settings flags plus the API keys, which only `config` accepts.
    pub fn to_layer(&self, global: &GlobalArgs) -> ConfigLayer {
        ConfigLayer {
            anthropic_api_key: self.anthropic_api_key.clone(),
            stability_api_key: self.stability_api_key.clone(),
            ..self.settings.to_layer(global)
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Env,
    Yaml,
}

#[derive(Args, Debug, Clone)]
pub struct VerifyArgs {
    /// Metadata records to check.
    #[arg(required = true)]
    pub records: Vec<PathBuf>,
}

impl SettingsArgs {
    /// The configuration fields set on the command line.
    pub fn to_layer(&self, global: &GlobalArgs) -> ConfigLayer {
        ConfigLayer {
            anthropic_model: self.anthropic_model.clone(),
            stability_model: self.stability_model.clone(),
            output_dir: self.output_dir.clone(),
            format: self.format,
            count: self.count,
            timeout_secs: self.timeout,
            retry_attempts: self.retry_attempts,
            parallel: self.parallel.then_some(true),
            max_workers: self.max_workers,
            continue_on_error: self.continue_on_error.then_some(true),
            log_level: global.forced_log_level().map(str::to_string),
            log_file: global.log_file.clone(),
            ..ConfigLayer::default()
        }
    }
}

impl GlobalArgs {
    /// `--debug` beats `--verbose`.
    pub fn forced_log_level(&self) -> Option<&'static str> {
        if self.debug {
            Some("trace")
        } else if self.verbose {
            Some("debug")
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("sdprompt").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    // -- generate --

    #[test]
    fn unset_flags_leave_layer_empty() {
        let cli = parse(&["generate"]);
        let Command::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(args.settings.to_layer(&cli.global), ConfigLayer::default());
    }

    #[test]
    fn flags_map_onto_layer_fields() {
        let cli = parse(&[
            "generate",
            "--format",
            "jpg",
            "-n",
            "3",
            "--parallel",
            "--timeout",
            "30",
            "--stability-model",
            "sd3",
            "-v",
        ]);
        let Command::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        let layer = args.settings.to_layer(&cli.global);
        assert_eq!(layer.format, Some(ImageFormat::Jpeg));
        assert_eq!(layer.count, Some(3));
        assert_eq!(layer.parallel, Some(true));
        assert_eq!(layer.continue_on_error, None);
        assert_eq!(layer.timeout_secs, Some(30));
        assert_eq!(layer.stability_model.as_deref(), Some("sd3"));
        assert_eq!(layer.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn input_and_metadata_conflict() {
        let result = Cli::try_parse_from([
            "sdprompt",
            "generate",
            "--input",
            "p.txt",
            "--metadata",
            "r.yaml",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn seed_is_range_checked() {
        let cli = parse(&["generate", "--seed", "4294967295"]);
        let Command::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(args.seed, Some(MAX_SEED));
        assert!(Cli::try_parse_from(["sdprompt", "generate", "--seed", "4294967296"]).is_err());
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert!(Cli::try_parse_from(["sdprompt", "generate", "--format", "gif"]).is_err());
    }

    // -- global --

    #[test]
    fn debug_wins_over_verbose() {
        let cli = parse(&["--debug", "-v", "verify", "a.yaml"]);
        assert_eq!(cli.global.forced_log_level(), Some("trace"));
    }

    #[test]
    fn config_export_defaults_to_env() {
        let cli = parse(&["config", "--output-dir", "out"]);
        let Command::Config(args) = cli.command else {
            panic!("expected config");
        };
        assert_eq!(args.export, ExportFormat::Env);
        assert_eq!(args.settings.output_dir, Some(PathBuf::from("out")));
    }

    #[test]
    fn config_export_accepts_api_keys() {
        let cli = parse(&[
            "config",
            "--export",
            "yaml",
            "--anthropic-api-key",
            "sk-ant",
            "--stability-api-key",
            "sk-stab",
            "-n",
            "2",
        ]);
        let Command::Config(args) = cli.command else {
            panic!("expected config");
        };
        let layer = args.to_layer(&cli.global);
        assert_eq!(layer.anthropic_api_key.as_deref(), Some("sk-ant"));
        assert_eq!(layer.stability_api_key.as_deref(), Some("sk-stab"));
        assert_eq!(layer.count, Some(2));
    }
}
