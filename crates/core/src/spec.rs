//! Generation spec: the schema-validated result of prompt elaboration.
//!
//! The language model is asked for a JSON document with three sections:
//!
//! ```text
//! {
//!   "status":     { "success": bool, "errors": [..], "warnings": [..] },
//!   "analysis":   { "subject": { "primary": str, .. },
//!                   "style": { "primary": str, .. },
//!                   "technical": { "composition": str, "lighting": str, "color": str },
//!                   "mood": str? },
//!   "generation": { "prompt": str, "negative_prompt": str,
//!                   "parameters": { "width", "height", "cfg_scale", "steps", "seed"? } }
//! }
//! ```
//!
//! [`parse_spec_response`] walks that document explicitly and reports the
//! dotted path of the first violation, so a bad response never reaches the
//! renderer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::remote::RemoteError;

// ---------------------------------------------------------------------------
// Parameter bounds
// ---------------------------------------------------------------------------

pub const MIN_DIMENSION: u32 = 512;
pub const MAX_DIMENSION: u32 = 1024;
/// Rendered dimensions must be multiples of this.
pub const DIMENSION_STEP: u32 = 64;
pub const MIN_CFG_SCALE: f64 = 1.0;
pub const MAX_CFG_SCALE: f64 = 20.0;
pub const MIN_STEPS: u32 = 10;
pub const MAX_STEPS: u32 = 150;
pub const MAX_SEED: u64 = 4_294_967_295;
/// Longest prompt (positive or negative) the image service accepts.
pub const MAX_PROMPT_CHARS: usize = 10_000;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Descriptive part of the elaboration. Informational only; rendering
/// uses the prompts and [`RenderParams`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecAnalysis {
    pub subject: String,
    pub style: String,
    pub composition: String,
    pub lighting: String,
    pub color: String,
    #[serde(default)]
    pub mood: String,
}

/// Numeric render parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderParams {
    pub width: u32,
    pub height: u32,
    pub cfg_scale: f64,
    pub steps: u32,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl RenderParams {
    /// Check every parameter against its bounds. `path` prefixes the field
    /// names in the returned error.
    pub fn validate(&self, path: &str) -> Result<(), SpecError> {
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&value) {
                return Err(SpecError::invalid(
                    format!("{path}.{name}"),
                    format!("{value} is outside {MIN_DIMENSION}..={MAX_DIMENSION}"),
                ));
            }
        }
        if !(MIN_CFG_SCALE..=MAX_CFG_SCALE).contains(&self.cfg_scale) {
            return Err(SpecError::invalid(
                format!("{path}.cfg_scale"),
                format!(
                    "{} is outside {MIN_CFG_SCALE}..={MAX_CFG_SCALE}",
                    self.cfg_scale
                ),
            ));
        }
        if !(MIN_STEPS..=MAX_STEPS).contains(&self.steps) {
            return Err(SpecError::invalid(
                format!("{path}.steps"),
                format!("{} is outside {MIN_STEPS}..={MAX_STEPS}", self.steps),
            ));
        }
        if let Some(seed) = self.seed {
            if seed > MAX_SEED {
                return Err(SpecError::invalid(
                    format!("{path}.seed"),
                    format!("{seed} exceeds {MAX_SEED}"),
                ));
            }
        }
        Ok(())
    }
}

/// Round an in-range dimension to the nearest multiple of [`DIMENSION_STEP`].
pub fn snap_dimension(value: u32) -> u32 {
    let snapped = (value + DIMENSION_STEP / 2) / DIMENSION_STEP * DIMENSION_STEP;
    snapped.clamp(MIN_DIMENSION, MAX_DIMENSION)
}

/// A validated generation spec, shared read-only by every render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSpec {
    pub analysis: SpecAnalysis,
    pub prompt: String,
    pub negative_prompt: String,
    pub params: RenderParams,
}

impl GenerationSpec {
    /// Validate prompts and parameters, snapping dimensions onto the grid.
    pub fn validated(mut self) -> Result<Self, SpecError> {
        validate_prompt(&self.prompt, "generation.prompt")?;
        validate_prompt(&self.negative_prompt, "generation.negative_prompt")?;
        self.params.validate("generation.parameters")?;
        self.params.width = snap_dimension(self.params.width);
        self.params.height = snap_dimension(self.params.height);
        Ok(self)
    }
}

fn validate_prompt(value: &str, path: &str) -> Result<(), SpecError> {
    if value.trim().is_empty() {
        return Err(SpecError::invalid(path, "must be a non-empty string"));
    }
    if value.chars().count() > MAX_PROMPT_CHARS {
        return Err(SpecError::invalid(
            path,
            format!("exceeds {MAX_PROMPT_CHARS} characters"),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Failure to obtain a usable spec. Always fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    /// The response is not a document of the expected shape.
    #[error("Spec schema violation at '{field_path}': {reason}")]
    SchemaInvalid { field_path: String, reason: String },

    /// The model reported `status.success = false`.
    #[error("Prompt elaboration was refused: {}", .reasons.join("; "))]
    Refused { reasons: Vec<String> },

    /// The language-model call itself failed.
    #[error("Language model call failed after {attempts} attempt(s): {source}")]
    Remote { source: RemoteError, attempts: u32 },
}

impl SpecError {
    pub fn invalid(field_path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaInvalid {
            field_path: field_path.into(),
            reason: reason.into(),
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            Self::SchemaInvalid { .. } => "retry; the language model returned an unusable spec",
            Self::Refused { .. } => "rephrase the prompt",
            Self::Remote { source, .. } => source.hint(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Return the outermost `{ ... }` span of `text`, skipping any prose or code
/// fences around it.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse and validate a language-model response into a [`GenerationSpec`].
pub fn parse_spec_response(text: &str) -> Result<GenerationSpec, SpecError> {
    let json = extract_json_object(text)
        .ok_or_else(|| SpecError::invalid("$", "no JSON object found in response"))?;
    let root: Value =
        serde_json::from_str(json).map_err(|e| SpecError::invalid("$", e.to_string()))?;
    let root = as_object(&root, "$")?;

    let status = object_field(root, "status", "status")?;
    if !bool_field(status, "success", "status.success")? {
        let reasons = optional_string_array(status, "errors", "status.errors")?;
        return Err(SpecError::Refused { reasons });
    }

    let analysis = object_field(root, "analysis", "analysis")?;
    let subject = object_field(analysis, "subject", "analysis.subject")?;
    let style = object_field(analysis, "style", "analysis.style")?;
    let technical = object_field(analysis, "technical", "analysis.technical")?;
    let analysis = SpecAnalysis {
        subject: string_field(subject, "primary", "analysis.subject.primary")?,
        style: string_field(style, "primary", "analysis.style.primary")?,
        composition: string_field(technical, "composition", "analysis.technical.composition")?,
        lighting: string_field(technical, "lighting", "analysis.technical.lighting")?,
        color: string_field(technical, "color", "analysis.technical.color")?,
        mood: optional_string(analysis, "mood", "analysis.mood")?.unwrap_or_default(),
    };

    let generation = object_field(root, "generation", "generation")?;
    let parameters = object_field(generation, "parameters", "generation.parameters")?;
    let params = RenderParams {
        width: u32_field(parameters, "width", "generation.parameters.width")?,
        height: u32_field(parameters, "height", "generation.parameters.height")?,
        cfg_scale: f64_field(parameters, "cfg_scale", "generation.parameters.cfg_scale")?,
        steps: u32_field(parameters, "steps", "generation.parameters.steps")?,
        seed: optional_u64(parameters, "seed", "generation.parameters.seed")?,
    };

    GenerationSpec {
        analysis,
        prompt: string_field(generation, "prompt", "generation.prompt")?,
        negative_prompt: string_field(generation, "negative_prompt", "generation.negative_prompt")?,
        params,
    }
    .validated()
}

// ---- private helpers ----

fn as_object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>, SpecError> {
    value
        .as_object()
        .ok_or_else(|| SpecError::invalid(path, format!("expected object, found {}", type_name(value))))
}

fn required<'a>(obj: &'a Map<String, Value>, key: &str, path: &str) -> Result<&'a Value, SpecError> {
    match obj.get(key) {
        Some(Value::Null) | None => Err(SpecError::invalid(path, "required field is missing")),
        Some(v) => Ok(v),
    }
}

fn object_field<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<&'a Map<String, Value>, SpecError> {
    as_object(required(obj, key, path)?, path)
}

fn string_field(obj: &Map<String, Value>, key: &str, path: &str) -> Result<String, SpecError> {
    let v = required(obj, key, path)?;
    v.as_str()
        .map(str::to_string)
        .ok_or_else(|| SpecError::invalid(path, format!("expected string, found {}", type_name(v))))
}

fn optional_string(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<String>, SpecError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => string_field(obj, key, path).map(Some),
    }
}

fn optional_string_array(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Vec<String>, SpecError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    SpecError::invalid(format!("{path}[{i}]"), "expected string")
                })
            })
            .collect(),
        Some(v) => Err(SpecError::invalid(
            path,
            format!("expected array, found {}", type_name(v)),
        )),
    }
}

fn bool_field(obj: &Map<String, Value>, key: &str, path: &str) -> Result<bool, SpecError> {
    let v = required(obj, key, path)?;
    v.as_bool()
        .ok_or_else(|| SpecError::invalid(path, format!("expected boolean, found {}", type_name(v))))
}

fn u32_field(obj: &Map<String, Value>, key: &str, path: &str) -> Result<u32, SpecError> {
    let v = required(obj, key, path)?;
    v.as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| SpecError::invalid(path, format!("expected non-negative integer, found {v}")))
}

fn f64_field(obj: &Map<String, Value>, key: &str, path: &str) -> Result<f64, SpecError> {
    let v = required(obj, key, path)?;
    v.as_f64()
        .ok_or_else(|| SpecError::invalid(path, format!("expected number, found {}", type_name(v))))
}

fn optional_u64(obj: &Map<String, Value>, key: &str, path: &str) -> Result<Option<u64>, SpecError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| SpecError::invalid(path, format!("expected non-negative integer, found {v}"))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
