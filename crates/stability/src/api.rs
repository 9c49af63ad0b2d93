//! REST API client for the Stability text-to-image endpoint.
//!
//! Wraps `POST /v1/generation/{engine}/text-to-image` using [`reqwest`].
//! One call renders one image; the base64 artifact is decoded here so
//! callers only ever see raw bytes.

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use sdprompt_core::http::{ensure_success, transport_error, HttpFailure};
use sdprompt_core::remote::{GeneratedImage, ImageRequest, ImageService, RemoteError, RemoteErrorKind};

/// HTTP client for the Stability API.
pub struct StabilityApi {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct TextToImageRequest<'a> {
    text_prompts: Vec<TextPrompt<'a>>,
    cfg_scale: f64,
    height: u32,
    width: u32,
    steps: u32,
    samples: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Debug, Serialize)]
struct TextPrompt<'a> {
    text: &'a str,
    weight: f64,
}

/// Response returned by the text-to-image endpoint.
#[derive(Debug, Deserialize)]
pub struct TextToImageResponse {
    pub artifacts: Vec<Artifact>,
}

/// One rendered image.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Base64-encoded image bytes.
    pub base64: String,
    pub seed: u64,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Finish reason the service reports when its filter removed the image.
const CONTENT_FILTERED: &str = "CONTENT_FILTERED";

/// Errors from the Stability REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum StabilityApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, body decode).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Stability returned a non-2xx status code.
    #[error("Stability API error {0}")]
    ApiError(#[from] HttpFailure),

    /// The response contained no artifacts.
    #[error("Stability response contained no artifacts")]
    NoArtifacts,

    /// The artifact was withheld by the content filter.
    #[error("Image was removed by the content filter")]
    ContentFiltered,

    /// The artifact payload was not valid base64.
    #[error("Artifact is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
}

impl From<StabilityApiError> for RemoteError {
    fn from(err: StabilityApiError) -> Self {
        match err {
            StabilityApiError::Request(e) => transport_error(&e),
            StabilityApiError::ApiError(failure) => failure.into(),
            StabilityApiError::ContentFiltered => RemoteError::new(
                RemoteErrorKind::ContentPolicy,
                "Image was removed by the content filter",
            ),
            other @ (StabilityApiError::NoArtifacts | StabilityApiError::Decode(_)) => {
                RemoteError::new(RemoteErrorKind::MalformedResponse, other.to_string())
            }
        }
    }
}

impl StabilityApi {
    /// * `api_url` - Base URL without a trailing slash, e.g. `https://api.stability.ai`.
    pub fn new(api_url: String, api_key: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, api_key)
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling across parallel renders).
    pub fn with_client(client: reqwest::Client, api_url: String, api_key: String) -> Self {
        Self {
            client,
            api_url,
            api_key,
        }
    }

    /// Render one image and return the decoded bytes with the seed used.
    ///
    /// The negative prompt is sent with weight `-1` and omitted when empty.
    pub async fn text_to_image(
        &self,
        request: &ImageRequest,
    ) -> Result<GeneratedImage, StabilityApiError> {
        let mut text_prompts = vec![TextPrompt {
            text: &request.prompt,
            weight: 1.0,
        }];
        if !request.negative_prompt.trim().is_empty() {
            text_prompts.push(TextPrompt {
                text: &request.negative_prompt,
                weight: -1.0,
            });
        }
        let body = TextToImageRequest {
            text_prompts,
            cfg_scale: request.cfg_scale,
            height: request.height,
            width: request.width,
            steps: request.steps,
            samples: 1,
            seed: request.seed,
        };

        let response = self
            .client
            .post(format!(
                "{}/v1/generation/{}/text-to-image",
                self.api_url, request.model
            ))
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await?;

        let parsed: TextToImageResponse = Self::parse_response(response).await?;
        let artifact = parsed
            .artifacts
            .into_iter()
            .next()
            .ok_or(StabilityApiError::NoArtifacts)?;

        if artifact.finish_reason.as_deref() == Some(CONTENT_FILTERED) {
            return Err(StabilityApiError::ContentFiltered);
        }

        let bytes = base64::engine::general_purpose::STANDARD.decode(artifact.base64.as_bytes())?;
        Ok(GeneratedImage {
            bytes,
            seed: artifact.seed,
        })
    }

    // ---- private helpers ----

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, StabilityApiError> {
        let response = ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait::async_trait]
impl ImageService for StabilityApi {
    async fn generate(&self, request: &ImageRequest) -> Result<GeneratedImage, RemoteError> {
        let image = self.text_to_image(request).await?;
        tracing::debug!(
            index = request.index,
            seed = image.seed,
            size_bytes = image.bytes.len(),
            "Stability artifact decoded"
        );
        Ok(image)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_omits_missing_seed() {
        let body = TextToImageRequest {
            text_prompts: vec![TextPrompt {
                text: "a cat",
                weight: 1.0,
            }],
            cfg_scale: 7.0,
            height: 512,
            width: 768,
            steps: 30,
            samples: 1,
            seed: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("seed").is_none());
        assert_eq!(value["width"], 768);
        assert_eq!(value["text_prompts"][0]["weight"], 1.0);
    }

    #[test]
    fn artifact_reads_camel_case_finish_reason() {
        let artifact: Artifact = serde_json::from_str(
            r#"{"base64": "AAAA", "seed": 42, "finishReason": "CONTENT_FILTERED"}"#,
        )
        .unwrap();
        assert_eq!(artifact.seed, 42);
        assert_eq!(artifact.finish_reason.as_deref(), Some(CONTENT_FILTERED));
    }

    #[test]
    fn filtered_and_missing_artifacts_map_to_remote_kinds() {
        let filtered: RemoteError = StabilityApiError::ContentFiltered.into();
        assert_eq!(filtered.kind, RemoteErrorKind::ContentPolicy);
        let empty: RemoteError = StabilityApiError::NoArtifacts.into();
        assert_eq!(empty.kind, RemoteErrorKind::MalformedResponse);
    }
}
