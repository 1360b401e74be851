//! Error types and failure classification.
//!
//! Only two severities ever cross the crate boundary: `Fatal` (the session
//! cannot continue) and `NonFatal` (informational, the session keeps
//! running). Retry, backoff and credential-rotation decisions stay
//! internal until every option is exhausted.

use thiserror::Error;

/// Errors produced by the streaming client.
#[derive(Debug, Clone, Error)]
pub enum AsrError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("authorization failed: {0}")]
    Unauthorized(String),
    #[error("all credentials exhausted")]
    CredentialsExhausted,
    #[error("malformed provider message: {0}")]
    MalformedMessage(String),
    #[error("audio processing error: {0}")]
    AudioProcessing(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid session state: {0}")]
    InvalidState(String),
    #[error("session closed")]
    SessionClosed,
}

/// Severity of an error event as seen by the transcript consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The session has ended and will not recover on its own.
    Fatal,
    /// The session continues; the event is informational.
    NonFatal,
}

/// Error event surfaced to the transcript consumer.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub severity: Severity,
    pub message: String,
    /// Provider-assigned code, when the provider supplied one.
    pub vendor_code: Option<String>,
}

impl ErrorEvent {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Fatal,
            message: message.into(),
            vendor_code: None,
        }
    }

    pub fn non_fatal(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::NonFatal,
            message: message.into(),
            vendor_code: None,
        }
    }

    pub fn with_vendor_code(mut self, code: impl Into<String>) -> Self {
        self.vendor_code = Some(code.into());
        self
    }
}

/// Substrings that mark a provider error as a quota or authorization
/// failure. Matched case-insensitively against the error message; extend
/// this table per provider rather than adding ad-hoc checks.
const QUOTA_KEYWORDS: &[&str] = &[
    "quota",
    "credit",
    "limit",
    "exceeded",
    "401",
    "402",
    "403",
    "unauthorized",
    "forbidden",
    "payment required",
    "no credits",
    "insufficient",
    "balance",
];

/// Classify an error message as a quota/authorization failure.
///
/// Such failures trigger credential rotation before the normal reconnect
/// path; everything else is treated as transient connectivity trouble.
pub fn is_quota_error(message: &str) -> bool {
    let lowered = message.to_lowercase();
    QUOTA_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_keywords_are_classified() {
        for msg in [
            "Quota exceeded for project",
            "HTTP 401 Unauthorized",
            "payment required",
            "no credits remaining on account",
            "insufficient balance",
            "403 Forbidden",
        ] {
            assert!(is_quota_error(msg), "expected quota classification: {msg}");
        }
    }

    #[test]
    fn classification_is_case_insensitive() {
        assert!(is_quota_error("QUOTA EXCEEDED"));
        assert!(is_quota_error("UnAuThOrIzEd"));
    }

    #[test]
    fn transient_errors_are_not_quota() {
        for msg in [
            "connection reset by peer",
            "dns lookup failed",
            "websocket handshake timed out",
            "internal server error",
        ] {
            assert!(!is_quota_error(msg), "unexpected quota classification: {msg}");
        }
    }

    #[test]
    fn error_event_builders() {
        let ev = ErrorEvent::non_fatal("transient").with_vendor_code("E42");
        assert_eq!(ev.severity, Severity::NonFatal);
        assert_eq!(ev.vendor_code.as_deref(), Some("E42"));

        let ev = ErrorEvent::fatal(AsrError::CredentialsExhausted.to_string());
        assert_eq!(ev.severity, Severity::Fatal);
        assert_eq!(ev.message, "all credentials exhausted");
    }
}
