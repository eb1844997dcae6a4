pub mod engine;

pub use engine::*;

use std::sync::Arc;

use crate::models::{AnalysisMap, RequestRecord};
use crate::pipeline::ai::heuristics::fallback_analysis;
use crate::pipeline::ai::{with_retry, AiBackend, AiServiceError, AnalysisContext, RetryPolicy};

/// Analysis of one chunk of records, with a local substitute for when the
/// real thing fails.
pub trait ChunkAnalyzer: Send + Sync {
    fn analyze_chunk(&self, chunk: &[RequestRecord]) -> Result<AnalysisMap, AiServiceError>;

    /// Never fails. Used for chunks that error, panic or time out.
    fn fallback_chunk(&self, chunk: &[RequestRecord]) -> AnalysisMap;
}

/// Remote backend behind the retry wrapper, keyword heuristics as fallback.
pub struct BackendAnalyzer {
    backend: Arc<dyn AiBackend>,
    context: AnalysisContext,
    retry: RetryPolicy,
}

impl BackendAnalyzer {
    pub fn new(backend: Arc<dyn AiBackend>, context: AnalysisContext, retry: RetryPolicy) -> Self {
        Self {
            backend,
            context,
            retry,
        }
    }
}

impl ChunkAnalyzer for BackendAnalyzer {
    fn analyze_chunk(&self, chunk: &[RequestRecord]) -> Result<AnalysisMap, AiServiceError> {
        with_retry(&self.retry, "analyze", || self.backend.analyze(chunk, &self.context))
    }

    fn fallback_chunk(&self, chunk: &[RequestRecord]) -> AnalysisMap {
        fallback_analysis(chunk, &self.context)
    }
}
