//! Seams to the two remote collaborators and the shared error taxonomy.
//!
//! The pipeline only ever talks to a [`SpecService`] (prompt elaboration)
//! and an [`ImageService`] (rendering). Concrete HTTP clients live in their
//! own crates; tests substitute scripted in-memory implementations.
//!
//! Every failure a collaborator reports is a [`RemoteError`] whose
//! [`RemoteErrorKind`] decides whether retrying can help.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::ImageIndex;

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// Classification of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// Connection refused, DNS failure, reset mid-request.
    Network,
    /// The call did not complete within the configured timeout.
    Timeout,
    /// HTTP 429 or an equivalent throttling signal.
    RateLimited,
    /// HTTP 5xx.
    ServerError,
    /// HTTP 401/402/403: bad key, revoked key, or no credits.
    Authentication,
    /// The service refused the content.
    ContentPolicy,
    /// HTTP 400/404/422 other than a policy refusal.
    InvalidParameters,
    /// The service answered 2xx but the body could not be understood.
    MalformedResponse,
    /// The render task itself crashed before producing an outcome.
    Internal,
}

impl RemoteErrorKind {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::RateLimited | Self::ServerError
        )
    }

    /// Short resolution hint shown to the user next to the error.
    pub fn hint(self) -> &'static str {
        match self {
            Self::Network => "check network connectivity and the service endpoint",
            Self::Timeout => "retry later or raise --timeout",
            Self::RateLimited => "retry later or lower the number of parallel workers",
            Self::ServerError => "retry later",
            Self::Authentication => "check API key and account credits",
            Self::ContentPolicy => "rephrase the prompt",
            Self::InvalidParameters => "reduce steps or adjust image dimensions",
            Self::MalformedResponse => "retry, or report the unexpected response",
            Self::Internal => "report this as a bug",
        }
    }

    /// Stable snake_case name, as written into metadata records.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::Authentication => "authentication",
            Self::ContentPolicy => "content_policy",
            Self::InvalidParameters => "invalid_parameters",
            Self::MalformedResponse => "malformed_response",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call to a remote collaborator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
    /// HTTP status, when the failure came from a response.
    pub status: Option<u16>,
    /// Server-provided retry-after hint (rate limiting).
    pub retry_after: Option<Duration>,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Classify a non-2xx HTTP response.
    ///
    /// - 401, 402, 403 -> `Authentication`
    /// - 429 -> `RateLimited`
    /// - 408 -> `Timeout`
    /// - 5xx -> `ServerError`
    /// - 400/422 mentioning moderation or policy -> `ContentPolicy`
    /// - any other 4xx -> `InvalidParameters`
    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let kind = match status {
            401 | 402 | 403 => RemoteErrorKind::Authentication,
            408 => RemoteErrorKind::Timeout,
            429 => RemoteErrorKind::RateLimited,
            500..=599 => RemoteErrorKind::ServerError,
            _ if mentions_policy(body) => RemoteErrorKind::ContentPolicy,
            _ => RemoteErrorKind::InvalidParameters,
        };
        Self::new(kind, format!("HTTP {status}: {}", truncate(body, MAX_BODY_IN_MESSAGE)))
            .with_status(status)
            .with_retry_after(retry_after)
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    pub fn hint(&self) -> &'static str {
        self.kind.hint()
    }
}

/// Longest response body excerpt kept in an error message.
const MAX_BODY_IN_MESSAGE: usize = 512;

const POLICY_MARKERS: &[&str] = &["content_policy", "moderation", "safety", "policy", "filtered"];

fn mentions_policy(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    POLICY_MARKERS.iter().any(|m| lower.contains(m))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Parse an HTTP `Retry-After` value given in delta-seconds.
///
/// HTTP-date values are not supported and yield `None`, which makes the
/// caller fall back to its computed backoff.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let trimmed = value.trim();
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && (0.0..1.0e9).contains(s))
        .map(Duration::from_secs_f64)
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// One request to the language model.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    /// Rendered template: system instructions with the user prompt substituted.
    pub prompt: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// A service that elaborates a rendered prompt into structured text.
#[async_trait::async_trait]
pub trait SpecService: Send + Sync {
    /// Return the raw text produced for `request`.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, RemoteError>;
}

/// Parameters for one render call.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    /// 1-based position in the run's fan-out. Only used for logging.
    pub index: ImageIndex,
    pub model: String,
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub cfg_scale: f64,
    pub steps: u32,
    /// `None` lets the service pick a seed.
    pub seed: Option<u64>,
    pub timeout: Duration,
}

/// Binary output of a successful render.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    /// Seed the service actually used.
    pub seed: u64,
}

/// A service that renders one image per call.
#[async_trait::async_trait]
pub trait ImageService: Send + Sync {
    async fn generate(&self, request: &ImageRequest) -> Result<GeneratedImage, RemoteError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- classification --

    #[test]
    fn transient_kinds() {
        assert!(RemoteErrorKind::Network.is_transient());
        assert!(RemoteErrorKind::Timeout.is_transient());
        assert!(RemoteErrorKind::RateLimited.is_transient());
        assert!(RemoteErrorKind::ServerError.is_transient());
    }

    #[test]
    fn permanent_kinds() {
        assert!(!RemoteErrorKind::Authentication.is_transient());
        assert!(!RemoteErrorKind::ContentPolicy.is_transient());
        assert!(!RemoteErrorKind::InvalidParameters.is_transient());
        assert!(!RemoteErrorKind::MalformedResponse.is_transient());
    }

    #[test]
    fn status_401_is_authentication() {
        let err = RemoteError::from_status(401, "invalid key", None);
        assert_eq!(err.kind, RemoteErrorKind::Authentication);
        assert_eq!(err.status, Some(401));
        assert_eq!(err.hint(), "check API key and account credits");
    }

    #[test]
    fn status_429_keeps_retry_after() {
        let err = RemoteError::from_status(429, "slow down", Some(Duration::from_secs(7)));
        assert_eq!(err.kind, RemoteErrorKind::RateLimited);
        assert_eq!(err.retry_after, Some(Duration::from_secs(7)));
        assert!(err.is_transient());
    }

    #[test]
    fn status_503_is_server_error() {
        assert_eq!(
            RemoteError::from_status(503, "", None).kind,
            RemoteErrorKind::ServerError
        );
    }

    #[test]
    fn status_400_with_policy_text_is_content_policy() {
        let err = RemoteError::from_status(400, r#"{"name":"content_moderation"}"#, None);
        assert_eq!(err.kind, RemoteErrorKind::ContentPolicy);
    }

    #[test]
    fn status_400_plain_is_invalid_parameters() {
        let err = RemoteError::from_status(400, "steps must be <= 50", None);
        assert_eq!(err.kind, RemoteErrorKind::InvalidParameters);
        assert_eq!(err.hint(), "reduce steps or adjust image dimensions");
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(4000);
        let err = RemoteError::from_status(500, &body, None);
        assert!(err.message.len() < 600);
    }

    // -- retry-after --

    #[test]
    fn retry_after_integer_seconds() {
        assert_eq!(parse_retry_after("12"), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after(" 3 "), Some(Duration::from_secs(3)));
    }

    #[test]
    fn retry_after_fractional_seconds() {
        assert_eq!(parse_retry_after("1.5"), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn retry_after_http_date_is_ignored() {
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
        assert_eq!(parse_retry_after("-4"), None);
    }

    #[test]
    fn kind_display_is_snake_case() {
        assert_eq!(RemoteErrorKind::RateLimited.to_string(), "rate_limited");
        let err = RemoteError::new(RemoteErrorKind::Timeout, "took too long");
        assert_eq!(err.to_string(), "timeout error: took too long");
    }
}
