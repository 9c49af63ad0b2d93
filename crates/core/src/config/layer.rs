//! Partial configuration layers.
//!
//! Each source (CLI, environment, YAML) produces a [`ConfigLayer`] in which
//! every field is optional. Layers are merged field by field, then the
//! result is filled with defaults and validated in `resolve`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{ConfigError, ImageFormat};

/// Prefix shared by every environment variable the tool reads.
pub const ENV_PREFIX: &str = "SDPROMPT_";

/// Environment variable name for a setting suffix, e.g. `OUTPUT_DIR`.
pub fn env_var_name(suffix: &str) -> String {
    format!("{ENV_PREFIX}{suffix}")
}

/// One source's view of the configuration. `None` means "not set here".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigLayer {
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: Option<String>,
    pub anthropic_base_url: Option<String>,
    pub stability_api_key: Option<String>,
    pub stability_model: Option<String>,
    pub stability_base_url: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub format: Option<ImageFormat>,
    pub count: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub parallel: Option<bool>,
    pub max_workers: Option<usize>,
    pub continue_on_error: Option<bool>,
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
}

impl ConfigLayer {
    /// Overlay `self` on `lower`: fields set in `self` win.
    pub fn merge(self, lower: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            anthropic_api_key: self.anthropic_api_key.or(lower.anthropic_api_key),
            anthropic_model: self.anthropic_model.or(lower.anthropic_model),
            anthropic_base_url: self.anthropic_base_url.or(lower.anthropic_base_url),
            stability_api_key: self.stability_api_key.or(lower.stability_api_key),
            stability_model: self.stability_model.or(lower.stability_model),
            stability_base_url: self.stability_base_url.or(lower.stability_base_url),
            output_dir: self.output_dir.or(lower.output_dir),
            format: self.format.or(lower.format),
            count: self.count.or(lower.count),
            timeout_secs: self.timeout_secs.or(lower.timeout_secs),
            retry_attempts: self.retry_attempts.or(lower.retry_attempts),
            parallel: self.parallel.or(lower.parallel),
            max_workers: self.max_workers.or(lower.max_workers),
            continue_on_error: self.continue_on_error.or(lower.continue_on_error),
            log_level: self.log_level.or(lower.log_level),
            log_file: self.log_file.or(lower.log_file),
        }
    }

    /// Build a layer from `SDPROMPT_*` variables.
    ///
    /// Unrelated variables are ignored. Empty values count as unset.
    pub fn from_env_vars<I, K, V>(vars: I) -> Result<ConfigLayer, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut layer = ConfigLayer::default();
        for (key, value) in vars {
            let Some(suffix) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            layer.set_env(suffix, value)?;
        }
        Ok(layer)
    }

    fn set_env(&mut self, suffix: &str, value: &str) -> Result<(), ConfigError> {
        match suffix {
            "ANTHROPIC_API_KEY" => self.anthropic_api_key = Some(value.to_string()),
            "ANTHROPIC_MODEL" => self.anthropic_model = Some(value.to_string()),
            "ANTHROPIC_BASE_URL" => self.anthropic_base_url = Some(value.to_string()),
            "STABILITY_API_KEY" => self.stability_api_key = Some(value.to_string()),
            "STABILITY_MODEL" => self.stability_model = Some(value.to_string()),
            "STABILITY_BASE_URL" => self.stability_base_url = Some(value.to_string()),
            "OUTPUT_DIR" => self.output_dir = Some(PathBuf::from(value)),
            "OUTPUT_FORMAT" => self.format = Some(parse_format("output.format", value)?),
            "IMAGE_COUNT" => self.count = Some(parse_number("generation.count", value)?),
            "TIMEOUT_SECS" => {
                self.timeout_secs = Some(parse_number("generation.timeout_secs", value)?)
            }
            "RETRY_ATTEMPTS" => {
                self.retry_attempts = Some(parse_number("generation.retry_attempts", value)?)
            }
            "PARALLEL" => self.parallel = Some(parse_bool("generation.parallel", value)?),
            "MAX_WORKERS" => {
                self.max_workers = Some(parse_number("generation.max_workers", value)?)
            }
            "CONTINUE_ON_ERROR" => {
                self.continue_on_error =
                    Some(parse_bool("generation.continue_on_error", value)?)
            }
            "LOG_LEVEL" => self.log_level = Some(value.to_ascii_lowercase()),
            "LOG_FILE" => self.log_file = Some(PathBuf::from(value)),
            other => {
                tracing::debug!(variable = %env_var_name(other), "Ignoring unknown setting");
            }
        }
        Ok(())
    }

    /// Build a layer from a YAML document.
    ///
    /// An empty document is an empty layer. Unknown keys are ignored.
    pub fn from_yaml_str(source: &str) -> Result<ConfigLayer, serde_yaml::Error> {
        if source.trim().is_empty() {
            return Ok(ConfigLayer::default());
        }
        let doc: Option<YamlDocument> = serde_yaml::from_str(source)?;
        Ok(doc.map(YamlDocument::into_layer).unwrap_or_default())
    }

    /// Render the layer in the YAML file layout. Unset fields are omitted.
    pub fn to_yaml_string(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&YamlDocument::from_layer(self))
    }
}

// ---------------------------------------------------------------------------
// YAML shape
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct YamlDocument {
    anthropic: YamlService,
    stability: YamlService,
    output: YamlOutput,
    generation: YamlGeneration,
    logging: YamlLogging,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct YamlService {
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct YamlOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    directory: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<ImageFormat>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct YamlGeneration {
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parallel: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    continue_on_error: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct YamlLogging {
    #[serde(skip_serializing_if = "Option::is_none")]
    level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<PathBuf>,
}

impl YamlDocument {
    fn from_layer(layer: &ConfigLayer) -> Self {
        YamlDocument {
            anthropic: YamlService {
                api_key: layer.anthropic_api_key.clone(),
                model: layer.anthropic_model.clone(),
                base_url: layer.anthropic_base_url.clone(),
            },
            stability: YamlService {
                api_key: layer.stability_api_key.clone(),
                model: layer.stability_model.clone(),
                base_url: layer.stability_base_url.clone(),
            },
            output: YamlOutput {
                directory: layer.output_dir.clone(),
                format: layer.format,
            },
            generation: YamlGeneration {
                count: layer.count,
                timeout_secs: layer.timeout_secs,
                retry_attempts: layer.retry_attempts,
                parallel: layer.parallel,
                max_workers: layer.max_workers,
                continue_on_error: layer.continue_on_error,
            },
            logging: YamlLogging {
                level: layer.log_level.clone(),
                file: layer.log_file.clone(),
            },
        }
    }

    fn into_layer(self) -> ConfigLayer {
        ConfigLayer {
            anthropic_api_key: non_empty(self.anthropic.api_key),
            anthropic_model: non_empty(self.anthropic.model),
            anthropic_base_url: non_empty(self.anthropic.base_url),
            stability_api_key: non_empty(self.stability.api_key),
            stability_model: non_empty(self.stability.model),
            stability_base_url: non_empty(self.stability.base_url),
            output_dir: self.output.directory,
            format: self.output.format,
            count: self.generation.count,
            timeout_secs: self.generation.timeout_secs,
            retry_attempts: self.generation.retry_attempts,
            parallel: self.generation.parallel,
            max_workers: self.generation.max_workers,
            continue_on_error: self.generation.continue_on_error,
            log_level: non_empty(self.logging.level).map(|l| l.to_ascii_lowercase()),
            log_file: self.logging.file,
        }
    }
}

// ---------------------------------------------------------------------------
// Value parsing
// ---------------------------------------------------------------------------

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::invalid(field, format!("'{value}' is not a valid number")))
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(
            field,
            format!("'{value}' is not a boolean (use true or false)"),
        )),
    }
}

fn parse_format(field: &'static str, value: &str) -> Result<ImageFormat, ConfigError> {
    value
        .parse()
        .map_err(|e: crate::error::CoreError| ConfigError::invalid(field, e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    // -- env --

    #[test]
    fn env_vars_populate_matching_fields() {
        let layer = ConfigLayer::from_env_vars([
            ("SDPROMPT_ANTHROPIC_API_KEY", "sk-ant"),
            ("SDPROMPT_IMAGE_COUNT", "4"),
            ("SDPROMPT_PARALLEL", "yes"),
            ("SDPROMPT_OUTPUT_FORMAT", "JPG"),
            ("HOME", "/root"),
        ])
        .unwrap();
        assert_eq!(layer.anthropic_api_key.as_deref(), Some("sk-ant"));
        assert_eq!(layer.count, Some(4));
        assert_eq!(layer.parallel, Some(true));
        assert_eq!(layer.format, Some(ImageFormat::Jpeg));
        assert_eq!(layer.stability_api_key, None);
    }

    #[test]
    fn empty_env_values_are_unset() {
        let layer = ConfigLayer::from_env_vars([("SDPROMPT_OUTPUT_DIR", "  ")]).unwrap();
        assert_eq!(layer.output_dir, None);
    }

    #[test]
    fn bad_env_number_names_field() {
        let err = ConfigLayer::from_env_vars([("SDPROMPT_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert_matches!(
            err,
            ConfigError::InvalidValue {
                field: "generation.timeout_secs",
                ..
            }
        );
    }

    #[test]
    fn bad_env_bool_is_rejected() {
        let err = ConfigLayer::from_env_vars([("SDPROMPT_PARALLEL", "maybe")]).unwrap_err();
        assert_matches!(err, ConfigError::InvalidValue { .. });
    }

    // -- yaml --

    #[test]
    fn yaml_sections_map_to_fields() {
        let layer = ConfigLayer::from_yaml_str(
            r#"
anthropic:
  api_key: sk-ant-yaml
  model: claude-test
stability:
  base_url: http://localhost:9000
output:
  directory: /tmp/out
  format: webp
generation:
  count: 3
  parallel: true
logging:
  level: DEBUG
"#,
        )
        .unwrap();
        assert_eq!(layer.anthropic_api_key.as_deref(), Some("sk-ant-yaml"));
        assert_eq!(layer.anthropic_model.as_deref(), Some("claude-test"));
        assert_eq!(layer.stability_base_url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(layer.output_dir, Some(PathBuf::from("/tmp/out")));
        assert_eq!(layer.format, Some(ImageFormat::Webp));
        assert_eq!(layer.count, Some(3));
        assert_eq!(layer.parallel, Some(true));
        assert_eq!(layer.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn empty_yaml_is_empty_layer() {
        assert_eq!(ConfigLayer::from_yaml_str("").unwrap(), ConfigLayer::default());
        assert_eq!(ConfigLayer::from_yaml_str("~\n").unwrap(), ConfigLayer::default());
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        assert!(ConfigLayer::from_yaml_str("generation: [unclosed").is_err());
    }

    // -- merge --

    #[test]
    fn merge_prefers_upper_layer_per_field() {
        let upper = ConfigLayer {
            count: Some(5),
            ..Default::default()
        };
        let lower = ConfigLayer {
            count: Some(2),
            timeout_secs: Some(30),
            ..Default::default()
        };
        let merged = upper.merge(lower);
        assert_eq!(merged.count, Some(5));
        assert_eq!(merged.timeout_secs, Some(30));
    }
}
