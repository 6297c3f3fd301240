// Error handling module
// Defines per-request error types and their classification for reporting

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest response body kept on an HTTP status error
pub const MAX_ERROR_BODY_CHARS: usize = 512;

/// Errors that end a single request/response exchange.
///
/// None of these are fatal to a run: the runner turns each one into a
/// failure record and moves on.
#[derive(Error, Debug)]
pub enum RequestError {
    /// Connection refused, reset, DNS failure or body read failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Connect, total or idle timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Server answered with a non-success status code
    #[error("HTTP error: {status} - {body}")]
    HttpStatus { status: u16, body: String },

    /// The task driving the request panicked or was cancelled
    #[error("Request aborted: {0}")]
    Aborted(String),
}

impl RequestError {
    /// Build an HTTP status error, truncating the diagnostic body.
    pub fn http_status(status: u16, body: &str) -> Self {
        let body = body.trim();
        let body = match body.char_indices().nth(MAX_ERROR_BODY_CHARS) {
            Some((cut, _)) => format!("{}...", &body[..cut]),
            None => body.to_string(),
        };
        RequestError::HttpStatus { status, body }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            RequestError::Transport(_) => FailureKind::Transport,
            RequestError::Timeout(_) => FailureKind::Timeout,
            RequestError::HttpStatus { .. } => FailureKind::HttpStatus,
            RequestError::Aborted(_) => FailureKind::Aborted,
        }
    }
}

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> Self {
        let message = error_chain(&err);
        if err.is_timeout() {
            RequestError::Timeout(message)
        } else {
            RequestError::Transport(message)
        }
    }
}

/// Coarse failure class stored on a record and counted per bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Timeout,
    HttpStatus,
    Aborted,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Transport => write!(f, "transport"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::HttpStatus => write!(f, "http_status"),
            FailureKind::Aborted => write!(f, "aborted"),
        }
    }
}

/// Flatten an error and its sources into one line.
///
/// reqwest's top-level message hides the interesting part (e.g. "connection
/// refused") in the source chain.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = RequestError::Transport("connection refused".to_string());
        assert_eq!(err.to_string(), "Transport error: connection refused");

        let err = RequestError::Timeout("idle for 5s".to_string());
        assert_eq!(err.to_string(), "Request timed out: idle for 5s");

        let err = RequestError::http_status(500, "boom\n");
        assert_eq!(err.to_string(), "HTTP error: 500 - boom");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            RequestError::Transport(String::new()).kind(),
            FailureKind::Transport
        );
        assert_eq!(
            RequestError::Timeout(String::new()).kind(),
            FailureKind::Timeout
        );
        assert_eq!(
            RequestError::http_status(503, "").kind(),
            FailureKind::HttpStatus
        );
        assert_eq!(
            RequestError::Aborted(String::new()).kind(),
            FailureKind::Aborted
        );
    }

    #[test]
    fn test_http_status_body_truncated() {
        let long = "x".repeat(MAX_ERROR_BODY_CHARS * 2);
        match RequestError::http_status(502, &long) {
            RequestError::HttpStatus { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body.len(), MAX_ERROR_BODY_CHARS + 3);
                assert!(body.ends_with("..."));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_failure_kind_display() {
        assert_eq!(FailureKind::HttpStatus.to_string(), "http_status");
        assert_eq!(FailureKind::Transport.to_string(), "transport");
    }
}
