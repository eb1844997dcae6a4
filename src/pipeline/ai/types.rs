use serde::{Deserialize, Serialize};

use super::BackendError;
use crate::models::{AnalysisMap, CaseMetadata, DocumentRef, ExtractedRequest, ObjectionDef, RequestRecord};

/// A structured-output service able to pull requests and caption data out of
/// document text and to analyze requests against objection definitions.
///
/// Calls are blocking and may run concurrently from several workers.
/// Implementations do not retry; callers wrap each call with
/// [`with_retry`](super::with_retry).
pub trait AiBackend: Send + Sync {
    fn name(&self) -> &str;

    /// True for backends that run entirely on local heuristics. Their
    /// pattern-parsed output is the normal result, not a degradation.
    fn is_local(&self) -> bool {
        false
    }

    fn extract_records(&self, text: &str) -> Result<Vec<ExtractedRequest>, BackendError>;

    fn extract_metadata(&self, text: &str) -> Result<CaseMetadata, BackendError>;

    fn analyze(
        &self,
        records: &[RequestRecord],
        context: &AnalysisContext,
    ) -> Result<AnalysisMap, BackendError>;
}

/// What an analysis call may reference besides the requests themselves.
#[derive(Debug, Clone, Default)]
pub struct AnalysisContext {
    pub documents: Vec<DocumentRef>,
    pub objections: Vec<ObjectionDef>,
}

impl AnalysisContext {
    pub fn new(documents: Vec<DocumentRef>, objections: Vec<ObjectionDef>) -> Self {
        Self {
            documents,
            objections,
        }
    }
}

/// Machine-readable failure class surfaced once retries are done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RateLimitExceeded,
    ConnectionError,
    ApiError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimitExceeded => write!(f, "RATE_LIMIT_EXCEEDED"),
            Self::ConnectionError => write!(f, "CONNECTION_ERROR"),
            Self::ApiError => write!(f, "API_ERROR"),
        }
    }
}

/// Structured error raised by the retry wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct AiServiceError {
    #[serde(rename = "error")]
    pub message: String,
    pub error_code: ErrorCode,
    pub retryable: bool,
    pub attempts: u32,
}

impl AiServiceError {
    /// Classify the last backend error after `attempts` calls.
    pub fn from_backend(error: &BackendError, attempts: u32, retryable: bool) -> Self {
        let (error_code, message) = match error {
            BackendError::RateLimited(_) => (
                ErrorCode::RateLimitExceeded,
                "AI service rate limit exceeded. Please try again later.".to_string(),
            ),
            BackendError::Connection(_) | BackendError::Server { .. } => (
                ErrorCode::ConnectionError,
                "Unable to connect to the AI service. Please check your connection.".to_string(),
            ),
            BackendError::Api { .. } | BackendError::MalformedResponse(_) => {
                (ErrorCode::ApiError, format!("AI service error: {error}"))
            }
        };
        Self {
            message,
            error_code,
            retryable,
            attempts,
        }
    }
}
