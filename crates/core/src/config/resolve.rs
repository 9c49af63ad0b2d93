//! Merge configuration layers into a validated [`EffectiveConfig`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{
    ConfigError, ConfigLayer, EffectiveConfig, ServiceConfig, DEFAULT_ANTHROPIC_BASE_URL,
    DEFAULT_ANTHROPIC_MODEL, DEFAULT_IMAGE_COUNT, DEFAULT_LOG_LEVEL, DEFAULT_MAX_WORKERS,
    DEFAULT_OUTPUT_DIR, DEFAULT_RETRY_ATTEMPTS, DEFAULT_STABILITY_BASE_URL,
    DEFAULT_STABILITY_MODEL, DEFAULT_TIMEOUT_SECS, MAX_IMAGE_COUNT, MAX_RETRY_ATTEMPTS,
    MAX_TIMEOUT_SECS, MAX_WORKERS, VALID_LOG_LEVELS,
};

/// Default `.env` location, used when no explicit env file is given.
const DEFAULT_ENV_FILE: &str = ".env";

/// Resolve the effective configuration for this process.
///
/// `cli` holds the flags the user passed. The environment layer is the
/// process environment over `env_file` (or `./.env` when present). The
/// YAML layer is read from `yaml_file` when given.
pub fn resolve(
    cli: ConfigLayer,
    env_file: Option<&Path>,
    yaml_file: Option<&Path>,
) -> Result<EffectiveConfig, ConfigError> {
    let env = load_env_layer(env_file, std::env::vars())?;
    let yaml = load_yaml_layer(yaml_file)?;
    resolve_layers(cli, env, yaml)
}

/// Build the environment layer: `process_vars` override values from the
/// dotenv file. The process environment is never modified.
pub fn load_env_layer<I>(env_file: Option<&Path>, process_vars: I) -> Result<ConfigLayer, ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let file_layer = match env_file {
        Some(path) => read_env_file(path)?,
        None => {
            let default = Path::new(DEFAULT_ENV_FILE);
            if default.is_file() {
                read_env_file(default)?
            } else {
                ConfigLayer::default()
            }
        }
    };
    let process_layer = ConfigLayer::from_env_vars(process_vars)?;
    Ok(process_layer.merge(file_layer))
}

fn read_env_file(path: &Path) -> Result<ConfigLayer, ConfigError> {
    let source_err = |reason: String| ConfigError::Source {
        path: path.to_path_buf(),
        reason,
    };
    let iter = dotenvy::from_path_iter(path).map_err(|e| source_err(e.to_string()))?;
    let vars = iter
        .collect::<Result<Vec<(String, String)>, _>>()
        .map_err(|e| source_err(e.to_string()))?;
    tracing::debug!(path = %path.display(), count = vars.len(), "Loaded env file");
    ConfigLayer::from_env_vars(vars)
}

/// Read the YAML layer, or an empty layer when no file is given.
pub fn load_yaml_layer(yaml_file: Option<&Path>) -> Result<ConfigLayer, ConfigError> {
    let Some(path) = yaml_file else {
        return Ok(ConfigLayer::default());
    };
    let source_err = |reason: String| ConfigError::Source {
        path: path.to_path_buf(),
        reason,
    };
    let text = std::fs::read_to_string(path).map_err(|e| source_err(e.to_string()))?;
    let layer = ConfigLayer::from_yaml_str(&text).map_err(|e| source_err(e.to_string()))?;
    tracing::debug!(path = %path.display(), "Loaded YAML config");
    Ok(layer)
}

/// Merge `cli > env > yaml > defaults` per field and validate the result.
///
/// Pure checks run first; the output directory is only created once every
/// other field is known to be valid.
pub fn resolve_layers(
    cli: ConfigLayer,
    env: ConfigLayer,
    yaml: ConfigLayer,
) -> Result<EffectiveConfig, ConfigError> {
    let merged = cli.merge(env).merge(yaml);

    let anthropic = ServiceConfig {
        api_key: validate_api_key("anthropic.api_key", merged.anthropic_api_key)?,
        model: validate_model(
            "anthropic.model",
            merged.anthropic_model,
            DEFAULT_ANTHROPIC_MODEL,
        )?,
        base_url: validate_base_url(
            "anthropic.base_url",
            merged.anthropic_base_url,
            DEFAULT_ANTHROPIC_BASE_URL,
        )?,
    };
    let stability = ServiceConfig {
        api_key: validate_api_key("stability.api_key", merged.stability_api_key)?,
        model: validate_model(
            "stability.model",
            merged.stability_model,
            DEFAULT_STABILITY_MODEL,
        )?,
        base_url: validate_base_url(
            "stability.base_url",
            merged.stability_base_url,
            DEFAULT_STABILITY_BASE_URL,
        )?,
    };

    let count = in_range(
        "generation.count",
        merged.count.unwrap_or(DEFAULT_IMAGE_COUNT),
        1,
        MAX_IMAGE_COUNT,
    )?;
    let timeout_secs = in_range(
        "generation.timeout_secs",
        merged.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        1,
        MAX_TIMEOUT_SECS,
    )?;
    let retry_attempts = in_range(
        "generation.retry_attempts",
        merged.retry_attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS),
        1,
        MAX_RETRY_ATTEMPTS,
    )?;
    let max_workers = in_range(
        "generation.max_workers",
        merged.max_workers.unwrap_or(DEFAULT_MAX_WORKERS),
        1,
        MAX_WORKERS,
    )?;

    let log_level = merged
        .log_level
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
        .to_ascii_lowercase();
    if !VALID_LOG_LEVELS.contains(&log_level.as_str()) {
        return Err(ConfigError::invalid(
            "logging.level",
            format!(
                "'{log_level}' is not one of: {}",
                VALID_LOG_LEVELS.join(", ")
            ),
        ));
    }

    let output_dir = merged
        .output_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
    ensure_writable_dir(&output_dir)?;

    if let Some(log_file) = &merged.log_file {
        if let Some(parent) = log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::PathUnwritable {
                path: parent.to_path_buf(),
                reason: e.to_string(),
            })?;
        }
    }

    Ok(EffectiveConfig {
        anthropic,
        stability,
        output_dir,
        format: merged.format.unwrap_or_default(),
        count,
        timeout: Duration::from_secs(timeout_secs),
        retry_attempts,
        parallel: merged.parallel.unwrap_or(false),
        max_workers,
        continue_on_error: merged.continue_on_error.unwrap_or(false),
        log_level,
        log_file: merged.log_file,
    })
}

/// Create `dir` if absent and prove it accepts new files.
///
/// Safe to call concurrently: an existing directory is not an error.
pub fn ensure_writable_dir(dir: &Path) -> Result<(), ConfigError> {
    let unwritable = |reason: String| ConfigError::PathUnwritable {
        path: dir.to_path_buf(),
        reason,
    };
    std::fs::create_dir_all(dir).map_err(|e| unwritable(e.to_string()))?;
    let probe = dir.join(format!(".sdprompt-probe-{}", uuid::Uuid::new_v4()));
    std::fs::write(&probe, b"").map_err(|e| unwritable(e.to_string()))?;
    if let Err(e) = std::fs::remove_file(&probe) {
        tracing::warn!(path = %probe.display(), error = %e, "Failed to remove write probe");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Field validators
// ---------------------------------------------------------------------------

fn validate_api_key(field: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    let key = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingField { field })?;
    if !key.starts_with("sk-") {
        return Err(ConfigError::invalid(field, "API keys must start with 'sk-'"));
    }
    Ok(key)
}

fn validate_model(
    field: &'static str,
    value: Option<String>,
    default: &str,
) -> Result<String, ConfigError> {
    let model = value.unwrap_or_else(|| default.to_string());
    let model = model.trim();
    if model.is_empty() {
        return Err(ConfigError::invalid(field, "model identifier must not be empty"));
    }
    Ok(model.to_string())
}

fn validate_base_url(
    field: &'static str,
    value: Option<String>,
    default: &str,
) -> Result<String, ConfigError> {
    let url = value.unwrap_or_else(|| default.to_string());
    let url = url.trim().trim_end_matches('/');
    let host = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| ConfigError::invalid(field, format!("'{url}' is not an http(s) URL")))?;
    if host.is_empty() {
        return Err(ConfigError::invalid(field, format!("'{url}' has no host")));
    }
    Ok(url.to_string())
}

fn in_range<T>(field: &'static str, value: T, min: T, max: T) -> Result<T, ConfigError>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if value < min || value > max {
        return Err(ConfigError::invalid(
            field,
            format!("{value} is outside {min}..={max}"),
        ));
    }
    Ok(value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
