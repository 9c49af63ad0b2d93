//! REST client for the Anthropic Messages endpoint.
//!
//! Wraps `POST /v1/messages` using [`reqwest`] and maps every failure onto
//! the shared [`RemoteError`] taxonomy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use sdprompt_core::http::{ensure_success, transport_error, HttpFailure};
use sdprompt_core::remote::{CompletionRequest, RemoteError, RemoteErrorKind, SpecService};

/// API version sent in the `anthropic-version` header.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// HTTP client for the Anthropic API.
pub struct AnthropicApi {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [UserMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Body of a successful `/v1/messages` response.
#[derive(Debug, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub id: Option<String>,
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

/// One block of response content. Only text blocks are used.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

impl MessageResponse {
    /// Concatenated text of every text block.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Errors from the Anthropic REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum AnthropicApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, body decode).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Anthropic returned a non-2xx status code.
    #[error("Anthropic API error {0}")]
    ApiError(#[from] HttpFailure),

    /// A 2xx response carried no text content.
    #[error("Anthropic response contained no text content")]
    EmptyContent,
}

impl From<AnthropicApiError> for RemoteError {
    fn from(err: AnthropicApiError) -> Self {
        match err {
            AnthropicApiError::Request(e) => transport_error(&e),
            AnthropicApiError::ApiError(failure) => failure.into(),
            AnthropicApiError::EmptyContent => RemoteError::new(
                RemoteErrorKind::MalformedResponse,
                "Anthropic response contained no text content",
            ),
        }
    }
}

impl AnthropicApi {
    /// * `api_url` - Base URL without a trailing slash, e.g. `https://api.anthropic.com`.
    pub fn new(api_url: String, api_key: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, api_key)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String, api_key: String) -> Self {
        Self {
            client,
            api_url,
            api_key,
        }
    }

    /// Send a single-turn user message and return the parsed response.
    ///
    /// `timeout` bounds the whole request, body included.
    pub async fn create_message(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<MessageResponse, AnthropicApiError> {
        let body = MessageRequest {
            model,
            max_tokens,
            messages: [UserMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.api_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .timeout(timeout)
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, AnthropicApiError> {
        let response = ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait::async_trait]
impl SpecService for AnthropicApi {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, RemoteError> {
        let response = self
            .create_message(
                &request.model,
                &request.prompt,
                request.max_tokens,
                request.timeout,
            )
            .await?;

        tracing::debug!(
            message_id = response.id.as_deref().unwrap_or("-"),
            stop_reason = response.stop_reason.as_deref().unwrap_or("-"),
            "Anthropic message received"
        );

        let text = response.text();
        if text.trim().is_empty() {
            return Err(AnthropicApiError::EmptyContent.into());
        }
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
