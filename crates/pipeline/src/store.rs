//! Verified artifact persistence, replay loading and re-verification.
//!
//! Every run writes into its own `<output_dir>/<run_id>/` directory, per
//! index `N`:
//!
//! ```text
//! image_00N.<format>   rendered bytes (successful renders only)
//! image_00N.yaml       ArtifactRecord (successful and failed renders)
//! ```
//!
//! Files are created with `create_new`, so an existing artifact is never
//! overwritten. Skipped renders leave nothing on disk.

use std::borrow::Cow;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::io::AsyncWriteExt as _;

use sdprompt_core::config::ImageFormat;
use sdprompt_core::hashing::sha256_hex;
use sdprompt_core::record::{
    artifact_stem, ArtifactRecord, ImageParameters, ImageVerification, ModelInfo, ModelRef,
    RecordError, RecordStatus, RECORD_EXTENSION, RECORD_SCHEMA_VERSION,
};
use sdprompt_core::spec::{GenerationSpec, SpecError};
use sdprompt_core::types::ImageIndex;

use crate::render_client::{RenderOutcome, RenderResult};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Failure to store or re-check one artifact. Scoped to that artifact.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("Integrity check failed for {}: expected {expected}, found {actual}", .path.display())]
    IntegrityFailure {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("Invalid metadata record {}: {reason}", .path.display())]
    RecordInvalid { path: PathBuf, reason: String },

    #[error("Record {} describes a failed render and has no image to verify", .path.display())]
    NothingToVerify { path: PathBuf },

    #[error("Could not convert {} to {format}: {reason}", .path.display())]
    Convert {
        path: PathBuf,
        format: ImageFormat,
        reason: String,
    },

    #[error("Invalid override: {0}")]
    InvalidOverride(String),
}

impl PersistError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            Self::IntegrityFailure { .. } => "check disk health and free space, then regenerate",
            Self::Io { .. } => "check that the output directory is writable",
            Self::Serialize(_) => "report this as a bug",
            Self::RecordInvalid { .. } => "pass a metadata file written by this tool",
            Self::NothingToVerify { .. } => "pick the record of a successful render",
            Self::Convert { .. } => "choose the format the image service returns",
            Self::InvalidOverride(_) => "pass a seed between 0 and 4294967295",
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Where a spec came from, as recorded in every artifact of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Provenance {
    pub run_id: String,
    pub original_prompt: String,
    /// Model that produced the spec.
    pub spec_model: String,
}

/// What [`VerificationStore::persist`] wrote for one result.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredArtifact {
    pub record: ArtifactRecord,
    pub record_path: PathBuf,
    /// Absent for failed renders.
    pub image_path: Option<PathBuf>,
}

/// Writes the artifacts and records of one run into its run directory.
pub struct VerificationStore {
    run_dir: PathBuf,
    format: ImageFormat,
    provenance: Provenance,
}

impl VerificationStore {
    pub fn new(run_dir: PathBuf, format: ImageFormat, provenance: Provenance) -> Self {
        Self {
            run_dir,
            format,
            provenance,
        }
    }

    pub fn image_path(&self, index: ImageIndex) -> PathBuf {
        self.run_dir
            .join(format!("{}.{}", artifact_stem(index), self.format.extension()))
    }

    pub fn record_path(&self, index: ImageIndex) -> PathBuf {
        self.run_dir
            .join(format!("{}.{}", artifact_stem(index), RECORD_EXTENSION))
    }

    /// Persist one render result.
    ///
    /// Success: encode the image in the configured format, write it, hash
    /// it, re-read and re-hash it, then write the record. A mismatch
    /// removes the image and fails with [`PersistError::IntegrityFailure`].
    /// Failure: write only a record with `success = false` and remove any
    /// image left at that index. Skipped: write nothing and return `None`.
    pub async fn persist(
        &self,
        result: &RenderResult,
        spec: &GenerationSpec,
    ) -> Result<Option<StoredArtifact>, PersistError> {
        tokio::fs::create_dir_all(&self.run_dir)
            .await
            .map_err(|e| PersistError::io(&self.run_dir, e))?;

        let (verification, image_path, status, seed) = match &result.outcome {
            RenderOutcome::Skipped => return Ok(None),
            RenderOutcome::Success { bytes, seed } => {
                let path = self.image_path(result.index);
                let encoded = encode_as(bytes, self.format).map_err(|e| PersistError::Convert {
                    path: path.clone(),
                    format: self.format,
                    reason: e.to_string(),
                })?;
                let verification = self.write_verified(&path, &encoded).await?;
                let status = RecordStatus {
                    success: true,
                    generation_time: result.elapsed.as_secs_f64(),
                    attempts: result.attempts,
                    error: None,
                };
                (Some(verification), Some(path), status, Some(*seed))
            }
            RenderOutcome::Failure { error } => {
                let status = RecordStatus {
                    success: false,
                    generation_time: result.elapsed.as_secs_f64(),
                    attempts: result.attempts,
                    error: Some(RecordError {
                        kind: error.kind.to_string(),
                        message: error.message.clone(),
                        hint: error.hint().to_string(),
                    }),
                };
                (None, None, status, result.requested_seed)
            }
        };

        let record = ArtifactRecord {
            schema_version: RECORD_SCHEMA_VERSION.to_string(),
            run_id: self.provenance.run_id.clone(),
            index: result.index,
            timestamp: Utc::now(),
            original_prompt: self.provenance.original_prompt.clone(),
            generated_prompt: spec.prompt.clone(),
            negative_prompt: spec.negative_prompt.clone(),
            analysis: spec.analysis.clone(),
            model_info: ModelInfo {
                anthropic: ModelRef::from_identifier(&self.provenance.spec_model),
                stability: ModelRef::from_identifier(&result.model),
            },
            image_parameters: ImageParameters {
                width: spec.params.width,
                height: spec.params.height,
                steps: spec.params.steps,
                cfg_scale: spec.params.cfg_scale,
                format: self.format.as_str().to_string(),
                seed,
            },
            image_verification: verification,
            status,
        };

        let record_path = self.record_path(result.index);
        let yaml = serde_yaml::to_string(&record)?;
        if let Err(e) = write_new(&record_path, yaml.as_bytes()).await {
            if let Some(path) = &image_path {
                remove_if_present(path).await;
            }
            return Err(e);
        }
        if image_path.is_none() {
            remove_if_present(&self.image_path(result.index)).await;
        }

        tracing::info!(
            index = result.index,
            success = record.status.success,
            record = %record_path.display(),
            "Artifact record written"
        );

        Ok(Some(StoredArtifact {
            record,
            record_path,
            image_path,
        }))
    }

    async fn write_verified(
        &self,
        path: &Path,
        bytes: &[u8],
    ) -> Result<ImageVerification, PersistError> {
        let expected = sha256_hex(bytes);
        write_new(path, bytes).await?;

        let on_disk = tokio::fs::read(path)
            .await
            .map_err(|e| PersistError::io(path, e))?;
        let actual = sha256_hex(&on_disk);
        if actual != expected {
            remove_if_present(path).await;
            return Err(PersistError::IntegrityFailure {
                path: path.to_path_buf(),
                expected,
                actual,
            });
        }

        let probe = probe_header(&on_disk);
        if probe.is_none() {
            tracing::warn!(path = %path.display(), "Could not detect image format from header");
        }

        Ok(ImageVerification {
            checksum_sha256: actual,
            size_bytes: on_disk.len() as u64,
            verification_time: Utc::now(),
            detected_format: probe.as_ref().map(|p| p.format.clone()),
            dimensions: probe.map(|p| format!("{}x{}", p.width, p.height)),
        })
    }
}

/// Create `path` and write `bytes`, failing if the file already exists.
async fn write_new(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|e| PersistError::io(path, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| PersistError::io(path, e))?;
    file.sync_all().await.map_err(|e| PersistError::io(path, e))
}

async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::info!(path = %path.display(), "Removed image"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove image"),
    }
}

// ---------------------------------------------------------------------------
// Format conversion
// ---------------------------------------------------------------------------

fn codec(format: ImageFormat) -> image::ImageFormat {
    match format {
        ImageFormat::Png => image::ImageFormat::Png,
        ImageFormat::Jpeg => image::ImageFormat::Jpeg,
        ImageFormat::Webp => image::ImageFormat::WebP,
    }
}

/// Re-encode `bytes` as `target` when the header names another format.
///
/// Bytes whose format cannot be detected are passed through unchanged.
fn encode_as(bytes: &[u8], target: ImageFormat) -> Result<Cow<'_, [u8]>, image::ImageError> {
    let wanted = codec(target);
    let found = match image::guess_format(bytes) {
        Ok(found) => found,
        Err(_) => {
            tracing::warn!(format = %target, "Unknown image encoding, storing bytes as received");
            return Ok(Cow::Borrowed(bytes));
        }
    };
    if found == wanted {
        return Ok(Cow::Borrowed(bytes));
    }

    let decoded = image::load_from_memory_with_format(bytes, found)?;
    // JPEG has no alpha channel; the lossless WebP encoder takes RGB(A)8.
    let decoded = match target {
        ImageFormat::Jpeg => image::DynamicImage::ImageRgb8(decoded.to_rgb8()),
        ImageFormat::Webp => image::DynamicImage::ImageRgba8(decoded.to_rgba8()),
        ImageFormat::Png => decoded,
    };
    let mut out = Cursor::new(Vec::new());
    decoded.write_to(&mut out, wanted)?;
    tracing::debug!(from = ?found, to = %target, "Image re-encoded");
    Ok(Cow::Owned(out.into_inner()))
}

// ---------------------------------------------------------------------------
// Header probe
// ---------------------------------------------------------------------------

/// Format and pixel size read from an encoded image header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderProbe {
    pub format: String,
    pub width: u32,
    pub height: u32,
}

/// Detect the encoded format and dimensions without decoding pixels.
pub fn probe_header(bytes: &[u8]) -> Option<HeaderProbe> {
    let format = image::guess_format(bytes).ok()?;
    let (width, height) = image::ImageReader::with_format(Cursor::new(bytes), format)
        .into_dimensions()
        .ok()?;
    let name = match format {
        image::ImageFormat::Png => "png",
        image::ImageFormat::Jpeg => "jpeg",
        image::ImageFormat::WebP => "webp",
        other => other.extensions_str().first().copied().unwrap_or("unknown"),
    };
    Some(HeaderProbe {
        format: name.to_string(),
        width,
        height,
    })
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

/// A spec reconstructed from a saved record.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayedSpec {
    pub spec: GenerationSpec,
    pub record: ArtifactRecord,
    /// Image model to render with: the override if given, else the
    /// recorded one.
    pub model: String,
}

/// Read and parse an [`ArtifactRecord`].
pub async fn read_record(path: &Path) -> Result<ArtifactRecord, PersistError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| PersistError::io(path, e))?;
    serde_yaml::from_str(&text).map_err(|e| PersistError::RecordInvalid {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Rebuild the spec stored in a record, applying invocation overrides.
///
/// A seed override replaces the recorded seed and is range-checked like a
/// recorded one.
pub async fn load_spec_from_record(
    path: &Path,
    seed_override: Option<u64>,
    model_override: Option<String>,
) -> Result<ReplayedSpec, PersistError> {
    let record = read_record(path).await?;
    let mut spec = record
        .to_spec()
        .map_err(|e: SpecError| PersistError::RecordInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    if let Some(seed) = seed_override {
        spec.params.seed = Some(seed);
        spec.params
            .validate("seed_override")
            .map_err(|e| PersistError::InvalidOverride(e.to_string()))?;
    }
    let model = model_override.unwrap_or_else(|| record.model_info.stability.model.clone());

    tracing::info!(
        record = %path.display(),
        seed = spec.params.seed,
        model = %model,
        "Loaded spec for replay"
    );

    Ok(ReplayedSpec {
        spec,
        record,
        model,
    })
}

// ---------------------------------------------------------------------------
// Verification of existing artifacts
// ---------------------------------------------------------------------------

/// Result of re-checking an artifact against its record.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyReport {
    pub image_path: PathBuf,
    pub checksum_sha256: String,
    pub size_bytes: u64,
}

/// Re-check the image next to `record_path` against the record's size and
/// checksum.
pub async fn verify_artifact(record_path: &Path) -> Result<VerifyReport, PersistError> {
    let record = read_record(record_path).await?;
    let Some(expected) = record.image_verification.as_ref() else {
        return Err(PersistError::NothingToVerify {
            path: record_path.to_path_buf(),
        });
    };

    let image_path = record_path.with_extension(&record.image_parameters.format);
    let bytes = tokio::fs::read(&image_path)
        .await
        .map_err(|e| PersistError::io(&image_path, e))?;

    let size_bytes = bytes.len() as u64;
    if size_bytes != expected.size_bytes {
        return Err(PersistError::IntegrityFailure {
            path: image_path,
            expected: format!("{} bytes", expected.size_bytes),
            actual: format!("{size_bytes} bytes"),
        });
    }
    let actual = sha256_hex(&bytes);
    if actual != expected.checksum_sha256 {
        return Err(PersistError::IntegrityFailure {
            path: image_path,
            expected: expected.checksum_sha256.clone(),
            actual,
        });
    }

    Ok(VerifyReport {
        image_path,
        checksum_sha256: actual,
        size_bytes,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use sdprompt_core::remote::{RemoteError, RemoteErrorKind};
    use sdprompt_core::spec::{RenderParams, SpecAnalysis, MAX_SEED};

    use super::*;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image::RgbaImage::new(width, height)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn store(dir: &Path) -> VerificationStore {
        store_as(dir, ImageFormat::Png)
    }

    fn store_as(dir: &Path, format: ImageFormat) -> VerificationStore {
        VerificationStore::new(
            dir.to_path_buf(),
            format,
            Provenance {
                run_id: "run-test".into(),
                original_prompt: "a fox".into(),
                spec_model: "claude-3-opus-20240229".into(),
            },
        )
    }

    fn spec() -> GenerationSpec {
        GenerationSpec {
            analysis: SpecAnalysis::default(),
            prompt: "a red fox in snow, detailed".into(),
            negative_prompt: "blurry".into(),
            params: RenderParams {
                width: 1024,
                height: 1024,
                cfg_scale: 7.0,
                steps: 30,
                seed: None,
            },
        }
    }

    fn result(index: ImageIndex, outcome: RenderOutcome) -> RenderResult {
        RenderResult {
            index,
            model: "stable-diffusion-xl-1024-v1-0".into(),
            requested_seed: Some(11),
            attempts: 2,
            elapsed: Duration::from_millis(1500),
            outcome,
        }
    }

    // -- persist --

    #[tokio::test]
    async fn success_writes_image_and_record_with_matching_checksum() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let stored = store
            .persist(
                &result(
                    1,
                    RenderOutcome::Success {
                        bytes: png(3, 2),
                        seed: 4242,
                    },
                ),
                &spec(),
            )
            .await
            .unwrap()
            .unwrap();

        let image_path = stored.image_path.clone().unwrap();
        assert_eq!(image_path, tmp.path().join("image_001.png"));
        assert_eq!(stored.record_path, tmp.path().join("image_001.yaml"));

        let on_disk = std::fs::read(&image_path).unwrap();
        let verification = stored.record.image_verification.as_ref().unwrap();
        assert_eq!(sha256_hex(&on_disk), verification.checksum_sha256);
        assert_eq!(verification.size_bytes, png(3, 2).len() as u64);
        assert_eq!(verification.detected_format.as_deref(), Some("png"));
        assert_eq!(verification.dimensions.as_deref(), Some("3x2"));
        assert_eq!(stored.record.image_parameters.seed, Some(4242));
        assert!(stored.record.status.success);
        assert_eq!(stored.record.status.attempts, 2);

        let back = read_record(&stored.record_path).await.unwrap();
        assert_eq!(back, stored.record);
    }

    #[tokio::test]
    async fn unrecognised_bytes_are_stored_without_probe_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let stored = store(tmp.path())
            .persist(
                &result(
                    2,
                    RenderOutcome::Success {
                        bytes: b"not an image".to_vec(),
                        seed: 1,
                    },
                ),
                &spec(),
            )
            .await
            .unwrap()
            .unwrap();
        let verification = stored.record.image_verification.unwrap();
        assert_eq!(verification.detected_format, None);
        assert_eq!(verification.dimensions, None);
    }

    #[tokio::test]
    async fn failure_writes_record_only() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let error = RemoteError::new(RemoteErrorKind::ContentPolicy, "refused");
        let stored = store
            .persist(&result(3, RenderOutcome::Failure { error }), &spec())
            .await
            .unwrap()
            .unwrap();

        assert!(stored.image_path.is_none());
        assert!(!store.image_path(3).exists());
        assert!(stored.record_path.exists());
        assert!(!stored.record.status.success);
        assert_eq!(stored.record.image_parameters.seed, Some(11));
        let err = stored.record.status.error.unwrap();
        assert_eq!(err.kind, "content_policy");
        assert_eq!(err.hint, "rephrase the prompt");
    }

    #[tokio::test]
    async fn failure_removes_image_left_at_the_same_index() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        std::fs::write(store.image_path(3), png(3, 2)).unwrap();

        let error = RemoteError::new(RemoteErrorKind::ServerError, "503");
        store
            .persist(&result(3, RenderOutcome::Failure { error }), &spec())
            .await
            .unwrap()
            .unwrap();

        assert!(!store.image_path(3).exists());
        assert!(store.record_path(3).exists());
    }

    #[tokio::test]
    async fn existing_record_is_never_overwritten() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let first = store
            .persist(
                &result(
                    1,
                    RenderOutcome::Success {
                        bytes: png(3, 2),
                        seed: 7,
                    },
                ),
                &spec(),
            )
            .await
            .unwrap()
            .unwrap();
        let record_before = std::fs::read_to_string(&first.record_path).unwrap();
        let image_before = std::fs::read(first.image_path.as_ref().unwrap()).unwrap();

        let error = RemoteError::new(RemoteErrorKind::Timeout, "slow");
        let err = store
            .persist(&result(1, RenderOutcome::Failure { error }), &spec())
            .await
            .unwrap_err();
        assert_matches!(
            err,
            PersistError::Io { ref source, .. } if source.kind() == std::io::ErrorKind::AlreadyExists
        );

        let again = store
            .persist(
                &result(
                    1,
                    RenderOutcome::Success {
                        bytes: png(5, 5),
                        seed: 8,
                    },
                ),
                &spec(),
            )
            .await;
        assert_matches!(again, Err(PersistError::Io { .. }));

        assert_eq!(std::fs::read_to_string(&first.record_path).unwrap(), record_before);
        assert_eq!(std::fs::read(first.image_path.unwrap()).unwrap(), image_before);
    }

    #[tokio::test]
    async fn image_is_reencoded_to_configured_format() {
        let tmp = tempfile::tempdir().unwrap();
        let stored = store_as(tmp.path(), ImageFormat::Jpeg)
            .persist(
                &result(
                    1,
                    RenderOutcome::Success {
                        bytes: png(3, 2),
                        seed: 5,
                    },
                ),
                &spec(),
            )
            .await
            .unwrap()
            .unwrap();

        let image_path = stored.image_path.unwrap();
        assert_eq!(image_path, tmp.path().join("image_001.jpeg"));
        let on_disk = std::fs::read(&image_path).unwrap();
        assert_eq!(image::guess_format(&on_disk).unwrap(), image::ImageFormat::Jpeg);

        let verification = stored.record.image_verification.unwrap();
        assert_eq!(verification.detected_format.as_deref(), Some("jpeg"));
        assert_eq!(verification.dimensions.as_deref(), Some("3x2"));
        assert_eq!(stored.record.image_parameters.format, "jpeg");

        let report = verify_artifact(&stored.record_path).await.unwrap();
        assert_eq!(report.image_path, image_path);
    }

    #[test]
    fn matching_format_is_passed_through() {
        let bytes = png(2, 2);
        let out = encode_as(&bytes, ImageFormat::Png).unwrap();
        assert_matches!(out, Cow::Borrowed(_));

        let webp = encode_as(&bytes, ImageFormat::Webp).unwrap();
        assert_eq!(image::guess_format(&webp).unwrap(), image::ImageFormat::WebP);
    }

    #[tokio::test]
    async fn skipped_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let stored = store(tmp.path())
            .persist(&result(4, RenderOutcome::Skipped), &spec())
            .await
            .unwrap();
        assert!(stored.is_none());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    // -- replay --

    #[tokio::test]
    async fn replay_applies_seed_and_model_overrides() {
        let tmp = tempfile::tempdir().unwrap();
        let stored = store(tmp.path())
            .persist(
                &result(
                    1,
                    RenderOutcome::Success {
                        bytes: png(3, 2),
                        seed: 4242,
                    },
                ),
                &spec(),
            )
            .await
            .unwrap()
            .unwrap();

        let plain = load_spec_from_record(&stored.record_path, None, None)
            .await
            .unwrap();
        assert_eq!(plain.spec.params.seed, Some(4242));
        assert_eq!(plain.model, "stable-diffusion-xl-1024-v1-0");
        assert_eq!(plain.spec.prompt, spec().prompt);

        let overridden = load_spec_from_record(&stored.record_path, Some(99), Some("sd3".into()))
            .await
            .unwrap();
        assert_eq!(overridden.spec.params.seed, Some(99));
        assert_eq!(overridden.model, "sd3");
    }

    #[tokio::test]
    async fn replay_rejects_out_of_range_seed_override() {
        let tmp = tempfile::tempdir().unwrap();
        let error = RemoteError::new(RemoteErrorKind::Timeout, "slow");
        let stored = store(tmp.path())
            .persist(&result(1, RenderOutcome::Failure { error }), &spec())
            .await
            .unwrap()
            .unwrap();

        assert_matches!(
            load_spec_from_record(&stored.record_path, Some(MAX_SEED + 1), None).await,
            Err(PersistError::InvalidOverride(_))
        );
        let max = load_spec_from_record(&stored.record_path, Some(MAX_SEED), None)
            .await
            .unwrap();
        assert_eq!(max.spec.params.seed, Some(MAX_SEED));
    }

    #[tokio::test]
    async fn replay_rejects_garbage_record() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.yaml");
        std::fs::write(&path, "schema_version: [").unwrap();
        assert_matches!(
            load_spec_from_record(&path, None, None).await,
            Err(PersistError::RecordInvalid { .. })
        );
    }

    // -- verify --

    #[tokio::test]
    async fn verify_detects_tampering() {
        let tmp = tempfile::tempdir().unwrap();
        let stored = store(tmp.path())
            .persist(
                &result(
                    1,
                    RenderOutcome::Success {
                        bytes: png(3, 2),
                        seed: 1,
                    },
                ),
                &spec(),
            )
            .await
            .unwrap()
            .unwrap();

        let report = verify_artifact(&stored.record_path).await.unwrap();
        assert_eq!(report.size_bytes, png(3, 2).len() as u64);

        let image_path = stored.image_path.unwrap();
        let mut bytes = png(3, 2);
        bytes[20] ^= 0xFF;
        std::fs::write(&image_path, &bytes).unwrap();
        assert_matches!(
            verify_artifact(&stored.record_path).await,
            Err(PersistError::IntegrityFailure { .. })
        );

        std::fs::write(&image_path, b"short").unwrap();
        assert_matches!(
            verify_artifact(&stored.record_path).await,
            Err(PersistError::IntegrityFailure { .. })
        );
    }

    #[tokio::test]
    async fn verify_refuses_failed_record() {
        let tmp = tempfile::tempdir().unwrap();
        let error = RemoteError::new(RemoteErrorKind::Timeout, "slow");
        let stored = store(tmp.path())
            .persist(&result(1, RenderOutcome::Failure { error }), &spec())
            .await
            .unwrap()
            .unwrap();
        assert_matches!(
            verify_artifact(&stored.record_path).await,
            Err(PersistError::NothingToVerify { .. })
        );
    }
}
