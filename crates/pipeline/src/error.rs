use sdprompt_core::config::ConfigError;
use sdprompt_core::spec::SpecError;

use crate::store::PersistError;

/// Errors that abort a whole run.
///
/// Per-image render and persist failures never appear here; they are
/// reported item by item in the run report.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Spec(#[from] SpecError),

    /// The replay record could not be loaded.
    #[error(transparent)]
    Replay(#[from] PersistError),

    /// The invocation itself is unusable (e.g. an empty prompt).
    #[error("{0}")]
    Usage(String),
}

impl PipelineError {
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Config(e) => e.hint(),
            Self::Spec(e) => e.hint(),
            Self::Replay(e) => e.hint(),
            Self::Usage(_) => "see --help for usage",
        }
    }
}
