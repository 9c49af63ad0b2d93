//! Effective configuration and its layered resolution.
//!
//! Settings come from four places, highest precedence first: CLI flags,
//! environment variables (the process environment over an optional `.env`
//! file), a YAML file, and built-in defaults. Precedence is applied per
//! field, so one run may take its API key from the environment and its
//! output directory from the YAML file.
//!
//! Resolution either returns a complete, validated [`EffectiveConfig`] or a
//! [`ConfigError`]; nothing downstream ever sees a partial configuration.

mod export;
mod layer;
mod resolve;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub use export::{export_env, export_yaml, missing_api_keys};
pub use layer::{env_var_name, ConfigLayer, ENV_PREFIX};
pub use resolve::{ensure_writable_dir, load_env_layer, load_yaml_layer, resolve, resolve_layers};

// ---------------------------------------------------------------------------
// Defaults and bounds
// ---------------------------------------------------------------------------

pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-opus-20240229";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_STABILITY_MODEL: &str = "stable-diffusion-xl-1024-v1-0";
pub const DEFAULT_STABILITY_BASE_URL: &str = "https://api.stability.ai";
pub const DEFAULT_OUTPUT_DIR: &str = "./output";
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const DEFAULT_IMAGE_COUNT: u32 = 1;
pub const MAX_IMAGE_COUNT: u32 = 16;

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const MAX_TIMEOUT_SECS: u64 = 600;

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

pub const DEFAULT_MAX_WORKERS: usize = 4;
pub const MAX_WORKERS: usize = 8;

/// Accepted log levels, lowest verbosity last.
pub const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

// ---------------------------------------------------------------------------
// Image format
// ---------------------------------------------------------------------------

/// Output encoding requested for generated images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Webp => "webp",
        }
    }

    /// File extension used for artifacts (same as [`as_str`](Self::as_str)).
    pub fn extension(self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "webp" => Ok(Self::Webp),
            other => Err(CoreError::Validation(format!(
                "Unknown image format '{other}'. Must be one of: png, jpeg, webp"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Effective configuration
// ---------------------------------------------------------------------------

/// Connection settings for one remote service.
#[derive(Clone, PartialEq)]
pub struct ServiceConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Fully resolved settings for one run. Built once, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub anthropic: ServiceConfig,
    pub stability: ServiceConfig,
    pub output_dir: PathBuf,
    pub format: ImageFormat,
    /// Number of images to render.
    pub count: u32,
    /// Bound on each individual remote call.
    pub timeout: Duration,
    /// Total attempts allowed per remote call, the first one included.
    pub retry_attempts: u32,
    pub parallel: bool,
    /// Worker limit when `parallel` is set.
    pub max_workers: usize,
    pub continue_on_error: bool,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl EffectiveConfig {
    /// Number of renders allowed in flight at once.
    pub fn concurrency(&self) -> usize {
        if self.parallel {
            self.max_workers.max(1)
        } else {
            1
        }
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Configuration could not be resolved. Always fatal, before any remote call.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting '{field}'")]
    MissingField { field: &'static str },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Path {} is not writable: {reason}", .path.display())]
    PathUnwritable { path: PathBuf, reason: String },

    #[error("Failed to read configuration from {}: {reason}", .path.display())]
    Source { path: PathBuf, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            Self::MissingField { .. } => {
                "check API key: set it in the YAML file, SDPROMPT_* environment, or CLI flags"
            }
            Self::InvalidValue { .. } => "fix the value or remove it to use the default",
            Self::PathUnwritable { .. } => "choose a different --output-dir or fix its permissions",
            Self::Source { .. } => "check the --config / --env path and its syntax",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_format_parses_aliases() {
        assert_eq!("PNG".parse::<ImageFormat>().unwrap(), ImageFormat::Png);
        assert_eq!("jpg".parse::<ImageFormat>().unwrap(), ImageFormat::Jpeg);
        assert_eq!(" webp ".parse::<ImageFormat>().unwrap(), ImageFormat::Webp);
        assert!("gif".parse::<ImageFormat>().is_err());
    }

    #[test]
    fn image_format_extension() {
        assert_eq!(ImageFormat::Jpeg.extension(), "jpeg");
        assert_eq!(ImageFormat::Webp.extension(), "webp");
    }

    #[test]
    fn service_config_debug_redacts_key() {
        let svc = ServiceConfig {
            api_key: "sk-secret".to_string(),
            model: "m".to_string(),
            base_url: "http://localhost".to_string(),
        };
        let debug = format!("{svc:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
