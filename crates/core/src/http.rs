//! Response and transport error handling shared by the `reqwest` clients.
//!
//! Enabled by the `http` feature so the domain crate stays free of network
//! code unless a client crate asks for it.

use std::fmt;
use std::time::Duration;

use crate::remote::{parse_retry_after, RemoteError, RemoteErrorKind};

/// A non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFailure {
    pub status: u16,
    pub body: String,
    pub retry_after: Option<Duration>,
}

impl fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}): {}", self.status, self.body)
    }
}

impl std::error::Error for HttpFailure {}

impl From<HttpFailure> for RemoteError {
    fn from(failure: HttpFailure) -> Self {
        RemoteError::from_status(failure.status, &failure.body, failure.retry_after)
    }
}

/// Return the response unchanged on success, or its status, body and any
/// `Retry-After` hint.
pub async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, HttpFailure> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    Err(HttpFailure {
        status: status.as_u16(),
        body,
        retry_after,
    })
}

/// Map a transport-level failure (connect, timeout, body decode) onto the
/// shared taxonomy.
pub fn transport_error(e: &reqwest::Error) -> RemoteError {
    let kind = if e.is_timeout() {
        RemoteErrorKind::Timeout
    } else if e.is_decode() {
        RemoteErrorKind::MalformedResponse
    } else {
        RemoteErrorKind::Network
    };
    RemoteError::new(kind, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_keeps_status_and_retry_hint() {
        let err: RemoteError = HttpFailure {
            status: 429,
            body: "slow down".into(),
            retry_after: Some(Duration::from_secs(3)),
        }
        .into();
        assert_eq!(err.kind, RemoteErrorKind::RateLimited);
        assert_eq!(err.status, Some(429));
        assert_eq!(err.retry_after, Some(Duration::from_secs(3)));
    }

    #[test]
    fn failure_display_shows_status_and_body() {
        let failure = HttpFailure {
            status: 503,
            body: "busy".into(),
            retry_after: None,
        };
        assert_eq!(failure.to_string(), "(503): busy");
    }
}
