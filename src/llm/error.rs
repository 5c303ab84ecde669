//! LLM error types (§10 ambient engineering stack).

use thiserror::Error;

/// Error classification for retry/fallback decisions (§4.6 Fallback).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Connection refused/reset/timeout - the transport itself failed.
    Network,
    /// Rate limited (429).
    RateLimit,
    /// Server error (5xx).
    ServerError,
    /// Authentication failed (401, 403).
    Auth,
    /// Bad request (400) whose body the fallback chain could not classify
    /// as a temperature or streaming rejection.
    InvalidRequest,
    /// Response body was not the shape the client expected.
    Parse,
    Unknown,
}

impl LlmErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::RateLimit | Self::ServerError)
    }
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
    pub status: Option<u16>,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Network, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Parse, message)
    }

    pub fn http(status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => LlmErrorKind::Auth,
            429 => LlmErrorKind::RateLimit,
            400 => LlmErrorKind::InvalidRequest,
            500..=599 => LlmErrorKind::ServerError,
            _ => LlmErrorKind::Unknown,
        };
        Self::new(kind, format!("HTTP {status}: {body}")).with_status(status)
    }

    /// Heuristic used by the fallback chain (§4.6): does this 400 response
    /// look like the provider rejecting the `temperature` parameter?
    pub fn looks_like_temperature_rejection(&self) -> bool {
        self.status == Some(400) && self.message.to_lowercase().contains("temperature")
    }

    /// Heuristic: does this response look like the provider rejecting
    /// `stream: true` rather than the request content itself?
    pub fn looks_like_streaming_rejection(&self) -> bool {
        let lower = self.message.to_lowercase();
        self.status == Some(400) && lower.contains("stream") && !lower.contains("temperature")
    }
}
