//! Remote structured-output backend, the retry wrapper around it, and the
//! local heuristics used when it is unavailable.

pub mod types;
pub mod retry;
pub mod prompt;
pub mod anthropic;
pub mod heuristics;
pub mod local;

pub use types::*;
pub use retry::*;
pub use anthropic::*;
pub use local::*;

use thiserror::Error;

/// A single failed backend call, before retry classification.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Rate limited by remote backend: {0}")]
    RateLimited(String),

    #[error("Cannot reach remote backend: {0}")]
    Connection(String),

    #[error("Remote backend unavailable (status {status}): {body}")]
    Server { status: u16, body: String },

    #[error("Remote backend rejected request (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),
}

impl BackendError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Connection(_) | Self::Server { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(BackendError::RateLimited("slow down".into()).is_retryable());
        assert!(BackendError::Connection("refused".into()).is_retryable());
        assert!(BackendError::Server { status: 529, body: String::new() }.is_retryable());
    }

    #[test]
    fn request_and_response_errors_are_not_retryable() {
        assert!(!BackendError::Api { status: 401, body: "bad key".into() }.is_retryable());
        assert!(!BackendError::MalformedResponse("no tool block".into()).is_retryable());
    }
}
