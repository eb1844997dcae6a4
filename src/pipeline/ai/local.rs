use super::heuristics::{extract_case_metadata, fallback_analysis, parse_requests};
use super::types::{AiBackend, AnalysisContext};
use super::BackendError;
use crate::models::{AnalysisMap, CaseMetadata, ExtractedRequest, RequestRecord};

/// Heuristic backend used when no API key is configured. Never fails and
/// never touches the network; its analysis entries are marked fallback.
pub struct LocalBackend;

impl AiBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn is_local(&self) -> bool {
        true
    }

    fn extract_records(&self, text: &str) -> Result<Vec<ExtractedRequest>, BackendError> {
        Ok(parse_requests(text))
    }

    fn extract_metadata(&self, text: &str) -> Result<CaseMetadata, BackendError> {
        Ok(extract_case_metadata(text))
    }

    fn analyze(
        &self,
        records: &[RequestRecord],
        context: &AnalysisContext,
    ) -> Result<AnalysisMap, BackendError> {
        Ok(fallback_analysis(records, context))
    }
}
