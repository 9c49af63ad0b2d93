//! Artifact metadata records.
//!
//! Every generated image gets a sibling YAML file describing how it was
//! produced and how it was verified. Failed renders get a record too, with
//! `status.success = false` and no image. Records are immutable once
//! written and carry enough to rebuild the generation spec (replay).

use serde::{Deserialize, Serialize};

use crate::spec::{GenerationSpec, RenderParams, SpecAnalysis, SpecError};
use crate::types::{ImageIndex, Timestamp};

/// Current schema version for artifact records.
pub const RECORD_SCHEMA_VERSION: &str = "1.0";

/// Extension of the metadata file written next to each image.
pub const RECORD_EXTENSION: &str = "yaml";

/// File stem shared by an image and its record, e.g. `image_007`.
pub fn artifact_stem(index: ImageIndex) -> String {
    format!("image_{index:03}")
}

/// Persisted metadata for one generated (or failed) image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub schema_version: String,
    /// Identifier shared by every record written in one run.
    pub run_id: String,
    pub index: ImageIndex,
    pub timestamp: Timestamp,
    pub original_prompt: String,
    pub generated_prompt: String,
    pub negative_prompt: String,
    #[serde(default)]
    pub analysis: SpecAnalysis,
    pub model_info: ModelInfo,
    pub image_parameters: ImageParameters,
    /// Absent for failed renders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_verification: Option<ImageVerification>,
    pub status: RecordStatus,
}

/// Models that produced the spec and the image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub anthropic: ModelRef,
    pub stability: ModelRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRef {
    pub model: String,
    pub version: String,
}

impl ModelRef {
    /// Reference a model by identifier. The version is the dated suffix
    /// of the identifier when it has one (`claude-3-opus-20240229` ->
    /// `20240229`), otherwise `unversioned`.
    pub fn from_identifier(model: &str) -> Self {
        let version = model
            .rsplit(|c: char| c == '-' || c == '_')
            .next()
            .filter(|tail| tail.len() >= 6 && tail.chars().all(|c| c.is_ascii_digit()))
            .map(str::to_string)
            .unwrap_or_else(|| "unversioned".to_string());
        Self {
            model: model.to_string(),
            version,
        }
    }
}

/// Parameters the image was rendered with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageParameters {
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg_scale: f64,
    pub format: String,
    /// Seed actually used; for failures, the requested seed if any.
    pub seed: Option<u64>,
}

/// Result of write verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageVerification {
    pub checksum_sha256: String,
    pub size_bytes: u64,
    pub verification_time: Timestamp,
    /// Encoded format detected from the file header, if recognisable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_format: Option<String>,
    /// `WIDTHxHEIGHT` decoded from the file header, if recognisable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordStatus {
    pub success: bool,
    /// Wall-clock seconds spent rendering, including retries.
    pub generation_time: f64,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RecordError>,
}

/// Error detail for a failed render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordError {
    pub kind: String,
    pub message: String,
    pub hint: String,
}

impl ArtifactRecord {
    /// Rebuild the generation spec this record was rendered from.
    ///
    /// The recorded seed becomes the spec seed, so an unmodified replay
    /// asks for the same image again.
    pub fn to_spec(&self) -> Result<GenerationSpec, SpecError> {
        GenerationSpec {
            analysis: self.analysis.clone(),
            prompt: self.generated_prompt.clone(),
            negative_prompt: self.negative_prompt.clone(),
            params: RenderParams {
                width: self.image_parameters.width,
                height: self.image_parameters.height,
                cfg_scale: self.image_parameters.cfg_scale,
                steps: self.image_parameters.steps,
                seed: self.image_parameters.seed,
            },
        }
        .validated()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
