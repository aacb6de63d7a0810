//! Failure taxonomy for calls into external services.
//!
//! Every collaborator (embedding model, language model, speech services,
//! image generator, document decoder) reports failures as a
//! [`ServiceError`]. The variant decides what the caller may do next:
//! only [`ServiceError::Retryable`] is ever retried.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// The uploaded bytes could not be decoded (malformed PDF, unknown image).
    #[error("could not decode upload: {0}")]
    Decode(String),

    /// Transient failure: network error, timeout, rate limit, 5xx.
    #[error("temporary service failure: {0}")]
    Retryable(String),

    /// The model declined the request for policy reasons.
    #[error("request declined by content policy: {0}")]
    ContentPolicy(String),

    /// Persistent failure or misconfiguration.
    #[error("service failure: {0}")]
    Terminal(String),
}

impl ServiceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Retryable(_))
    }

    /// Short machine-readable name for logs and API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Decode(_) => "decode",
            ServiceError::Retryable(_) => "retryable",
            ServiceError::ContentPolicy(_) => "content_policy",
            ServiceError::Terminal(_) => "terminal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_retryable_is_retryable() {
        assert!(ServiceError::Retryable("x".into()).is_retryable());
        assert!(!ServiceError::Decode("x".into()).is_retryable());
        assert!(!ServiceError::ContentPolicy("x".into()).is_retryable());
        assert!(!ServiceError::Terminal("x".into()).is_retryable());
    }

    #[test]
    fn display_includes_detail() {
        let e = ServiceError::ContentPolicy("SAFETY".into());
        assert_eq!(e.to_string(), "request declined by content policy: SAFETY");
    }
}
