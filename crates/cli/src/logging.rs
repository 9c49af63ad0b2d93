//! Tracing subscriber setup: an `EnvFilter` scoped to the workspace crates,
//! a stderr layer, and an optional append-only log file without ANSI codes.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context as _;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CRATES: &[&str] = &[
    "sdprompt",
    "sdprompt_core",
    "sdprompt_pipeline",
    "sdprompt_anthropic",
    "sdprompt_stability",
];

/// Filter directive enabling `level` for this workspace and `warn` for
/// everything else.
pub fn default_directive(level: &str) -> String {
    let mut directives: Vec<String> = CRATES.iter().map(|c| format!("{c}={level}")).collect();
    directives.insert(0, "warn".to_string());
    directives.join(",")
}

/// Install the global subscriber. `RUST_LOG` overrides `level`.
pub fn init(level: &str, log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive(level).into());

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file '{}'", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_scopes_level_to_workspace() {
        let directive = default_directive("debug");
        assert!(directive.starts_with("warn,"));
        assert!(directive.contains("sdprompt_pipeline=debug"));
        assert!(EnvFilter::try_new(&directive).is_ok());
    }
}
