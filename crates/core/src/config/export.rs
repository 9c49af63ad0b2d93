//! Write a configuration layer back out as a `.env` or YAML file body.
//!
//! Exports are filled with defaults so the result documents every setting.
//! API keys that were never supplied are left out; callers report them with
//! [`missing_api_keys`].

use std::path::PathBuf;

use super::layer::env_var_name;
use super::{
    ConfigLayer, DEFAULT_ANTHROPIC_BASE_URL, DEFAULT_ANTHROPIC_MODEL, DEFAULT_IMAGE_COUNT,
    DEFAULT_LOG_LEVEL, DEFAULT_MAX_WORKERS, DEFAULT_OUTPUT_DIR, DEFAULT_RETRY_ATTEMPTS,
    DEFAULT_STABILITY_BASE_URL, DEFAULT_STABILITY_MODEL, DEFAULT_TIMEOUT_SECS,
};

/// Environment variable names of API keys absent from `layer`.
pub fn missing_api_keys(layer: &ConfigLayer) -> Vec<String> {
    let mut missing = Vec::new();
    if layer.anthropic_api_key.is_none() {
        missing.push(env_var_name("ANTHROPIC_API_KEY"));
    }
    if layer.stability_api_key.is_none() {
        missing.push(env_var_name("STABILITY_API_KEY"));
    }
    missing
}

/// Render `layer` as `SDPROMPT_*=value` lines.
pub fn export_env(layer: &ConfigLayer) -> String {
    let l = with_defaults(layer.clone());
    let mut lines = Vec::new();
    let mut push = |suffix: &str, value: Option<String>| {
        if let Some(value) = value {
            lines.push(format!("{}={}", env_var_name(suffix), value));
        }
    };
    push("ANTHROPIC_API_KEY", l.anthropic_api_key);
    push("ANTHROPIC_MODEL", l.anthropic_model);
    push("ANTHROPIC_BASE_URL", l.anthropic_base_url);
    push("STABILITY_API_KEY", l.stability_api_key);
    push("STABILITY_MODEL", l.stability_model);
    push("STABILITY_BASE_URL", l.stability_base_url);
    push("OUTPUT_DIR", l.output_dir.map(|p| p.display().to_string()));
    push("OUTPUT_FORMAT", l.format.map(|f| f.to_string()));
    push("IMAGE_COUNT", l.count.map(|v| v.to_string()));
    push("TIMEOUT_SECS", l.timeout_secs.map(|v| v.to_string()));
    push("RETRY_ATTEMPTS", l.retry_attempts.map(|v| v.to_string()));
    push("PARALLEL", l.parallel.map(|v| v.to_string()));
    push("MAX_WORKERS", l.max_workers.map(|v| v.to_string()));
    push("CONTINUE_ON_ERROR", l.continue_on_error.map(|v| v.to_string()));
    push("LOG_LEVEL", l.log_level);
    push("LOG_FILE", l.log_file.map(|p| p.display().to_string()));

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Render `layer` in the YAML config file layout.
pub fn export_yaml(layer: &ConfigLayer) -> Result<String, serde_yaml::Error> {
    with_defaults(layer.clone()).to_yaml_string()
}

fn with_defaults(layer: ConfigLayer) -> ConfigLayer {
    let defaults = ConfigLayer {
        anthropic_api_key: None,
        anthropic_model: Some(DEFAULT_ANTHROPIC_MODEL.to_string()),
        anthropic_base_url: Some(DEFAULT_ANTHROPIC_BASE_URL.to_string()),
        stability_api_key: None,
        stability_model: Some(DEFAULT_STABILITY_MODEL.to_string()),
        stability_base_url: Some(DEFAULT_STABILITY_BASE_URL.to_string()),
        output_dir: Some(PathBuf::from(DEFAULT_OUTPUT_DIR)),
        format: Some(Default::default()),
        count: Some(DEFAULT_IMAGE_COUNT),
        timeout_secs: Some(DEFAULT_TIMEOUT_SECS),
        retry_attempts: Some(DEFAULT_RETRY_ATTEMPTS),
        parallel: Some(false),
        max_workers: Some(DEFAULT_MAX_WORKERS),
        continue_on_error: Some(false),
        log_level: Some(DEFAULT_LOG_LEVEL.to_string()),
        log_file: None,
    };
    layer.merge(defaults)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
