//! Pipeline orchestrator.
//!
//! Drives one upload from raw PDF bytes to an updated session:
//! `NotStarted → Reading → Extracting → Merging → SessionUpdated | Failed`.
//!
//! Extracting fans out: caption metadata goes to the shared worker pool while
//! request extraction runs on the runner thread. Request extraction is
//! mandatory and fails the run. Metadata is optional and degrades to `None`. Analysis runs go through the chunked engine on the same pool.
//! Every run ends in exactly one terminal job transition, including runs
//! that panic.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{mpsc, Arc};

use serde::Serialize;
use uuid::Uuid;

use crate::config::PipelineSettings;
use crate::jobs::{JobRegistry, JobStatus, RegistryError};
use crate::models::{fallback_count, AnalysisMap, CaseMetadata, ExtractedRequest, ObjectionDef, RequestRecord};
use crate::pipeline::ai::heuristics::parse_requests;
use crate::pipeline::ai::{with_retry, AiBackend, AiServiceError, AnalysisContext, RetryPolicy};
use crate::pipeline::analysis::{AnalysisEngine, BackendAnalyzer, ChunkAnalyzer, EngineConfig};
use crate::pipeline::extraction::{ExtractedText, ExtractionError, ExtractionTier, TextExtractionChain};
use crate::pipeline::panic_message;
use crate::session_store::{SessionStore, StoreError};

/// Progress units of a pipeline run: read, extract, merge, store.
pub const PIPELINE_STEPS: usize = 4;

/// `parser_used` when the local pattern parser stood in for the backend.
pub const PATTERN_PARSER: &str = "pattern";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Extraction(#[from] ExtractionError),

    #[error("Request extraction failed: {0}")]
    RecordExtraction(#[from] AiServiceError),

    #[error("Could not extract any requests from the PDF. The document may not be a standard request format.")]
    NoRecords,

    #[error("No requests to analyze")]
    NothingToAnalyze,

    #[error("Job registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Could not serialize result: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Pipeline worker panicked: {0}")]
    Panicked(String),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    NotStarted,
    Reading,
    Extracting,
    Merging,
    SessionUpdated,
    Failed,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotStarted => "not_started",
            Self::Reading => "reading",
            Self::Extracting => "extracting",
            Self::Merging => "merging",
            Self::SessionUpdated => "session_updated",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// An uploaded document, held in memory for the length of one run.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }

    pub fn is_pdf(&self) -> bool {
        std::path::Path::new(&self.filename)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
    }
}

/// Result of a pipeline job, as returned by `poll` on completion.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub session_id: String,
    pub source_filename: String,
    pub total_requests: usize,
    pub page_count: usize,
    pub extraction_tier: ExtractionTier,
    pub extractor: String,
    pub parser_used: String,
    /// True when the pattern parser replaced a failed backend extraction.
    pub degraded: bool,
    pub metadata: Option<CaseMetadata>,
    pub requests: Vec<RequestRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedChunk {
    pub chunk: usize,
    pub reason: String,
}

/// Result of an analysis job.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub session_id: String,
    pub backend: String,
    pub total_requests: usize,
    pub applied: usize,
    pub chunks: usize,
    pub fallback_entries: usize,
    pub failed_chunks: Vec<FailedChunk>,
    pub degraded: bool,
    pub suggestions: AnalysisMap,
}

#[derive(Debug, Clone, Copy)]
pub struct ProcessorSettings {
    pub retry: RetryPolicy,
    pub metadata_pages: usize,
    pub local_parser_fallback: bool,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            metadata_pages: crate::config::DEFAULT_METADATA_PAGES,
            local_parser_fallback: true,
        }
    }
}

impl From<&PipelineSettings> for ProcessorSettings {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            retry: settings.retry,
            metadata_pages: settings.metadata_pages,
            local_parser_fallback: settings.local_parser_fallback,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs pipeline and analysis jobs. Holds no per-run state, so one instance
/// serves every runner thread.
pub struct PipelineProcessor {
    chain: Arc<TextExtractionChain>,
    backend: Arc<dyn AiBackend>,
    store: Arc<dyn SessionStore>,
    registry: Arc<JobRegistry>,
    workers: Arc<rayon::ThreadPool>,
    engine: AnalysisEngine,
    settings: ProcessorSettings,
}

impl PipelineProcessor {
    pub fn new(
        chain: TextExtractionChain,
        backend: Arc<dyn AiBackend>,
        store: Arc<dyn SessionStore>,
        registry: Arc<JobRegistry>,
        workers: Arc<rayon::ThreadPool>,
        engine_config: EngineConfig,
        settings: ProcessorSettings,
    ) -> Self {
        let engine = AnalysisEngine::new(Arc::clone(&workers), engine_config);
        Self {
            chain: Arc::new(chain),
            backend,
            store,
            registry,
            workers,
            engine,
            settings,
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn chunk_count(&self, records: usize) -> usize {
        self.engine.chunk_count(records)
    }

    /// Run one upload to completion and record the outcome on `job_id`.
    pub fn run_pipeline(&self, job_id: Uuid, session_id: &str, upload: &UploadedFile) -> PipelineStage {
        tracing::info!(job_id = %job_id, session_id, filename = %upload.filename, bytes = upload.bytes.len(), "Pipeline run starting");

        let outcome = catch_unwind(AssertUnwindSafe(|| self.process(job_id, session_id, upload)))
            .unwrap_or_else(|panic| Err(ProcessingError::Panicked(panic_message(panic.as_ref()))))
            .and_then(|summary| {
                let message = format!("Found {} requests", summary.total_requests);
                self.complete(job_id, &summary, summary.degraded, &message)
            });

        match outcome {
            Ok(()) => {
                enter(job_id, PipelineStage::SessionUpdated);
                PipelineStage::SessionUpdated
            }
            Err(e) => {
                enter(job_id, PipelineStage::Failed);
                self.fail(job_id, &e);
                PipelineStage::Failed
            }
        }
    }

    /// Analyze every record of a session against `objections` and write the
    /// suggestions back.
    pub fn run_analysis(&self, job_id: Uuid, session_id: &str, objections: Vec<ObjectionDef>) -> JobStatus {
        tracing::info!(job_id = %job_id, session_id, objections = objections.len(), "Analysis run starting");

        let outcome = catch_unwind(AssertUnwindSafe(|| self.analyze_session(job_id, session_id, objections)))
            .unwrap_or_else(|panic| Err(ProcessingError::Panicked(panic_message(panic.as_ref()))))
            .and_then(|summary| {
                let message = if summary.degraded {
                    format!(
                        "Analysis complete ({} of {} requests used keyword fallback)",
                        summary.fallback_entries, summary.total_requests
                    )
                } else {
                    "Analysis complete".to_string()
                };
                self.complete(job_id, &summary, summary.degraded, &message)
            });

        match outcome {
            Ok(()) => JobStatus::Completed,
            Err(e) => {
                self.record_analysis_error(session_id, &e);
                self.fail(job_id, &e);
                JobStatus::Failed
            }
        }
    }

    // ── Pipeline stages ─────────────────────────────────────

    fn process(
        &self,
        job_id: Uuid,
        session_id: &str,
        upload: &UploadedFile,
    ) -> Result<PipelineSummary, ProcessingError> {
        if self.store.get(session_id)?.is_none() {
            return Err(ProcessingError::SessionNotFound(session_id.to_string()));
        }

        enter(job_id, PipelineStage::Reading);
        self.registry.set_running(job_id, Some(PIPELINE_STEPS), "Reading document...")?;
        let text: ExtractedText = self.chain.extract_full(&upload.bytes)?;

        enter(job_id, PipelineStage::Extracting);
        self.registry.update_progress(
            job_id,
            1,
            &format!("Extracting requests ({} pages)...", text.page_count),
        );
        let metadata_rx = self.spawn_metadata(&upload.bytes);
        let records = self.extract_records(&text.full_text);
        let metadata = metadata_rx.recv().unwrap_or_else(|_| {
            tracing::warn!("Metadata worker went away, continuing without it");
            None
        });
        let (extracted, parser_used) = records?;
        self.registry.update_progress(job_id, 2, &format!("Found {} requests", extracted.len()));

        enter(job_id, PipelineStage::Merging);
        let requests: Vec<RequestRecord> = extracted
            .into_iter()
            .enumerate()
            .map(|(i, r)| r.into_record(i as u32 + 1))
            .collect();

        // Re-read: the session may have been edited while extraction ran
        let mut session = self
            .store
            .get(session_id)?
            .ok_or_else(|| ProcessingError::SessionNotFound(session_id.to_string()))?;
        session.source_filename = upload.filename.clone();
        session.records = requests.clone();
        session.metadata = metadata.clone();
        session.analysis_complete = false;
        session.analysis_error = None;
        self.store.update(session)?;
        self.registry.update_progress(job_id, 3, "Session updated");

        Ok(PipelineSummary {
            session_id: session_id.to_string(),
            source_filename: upload.filename.clone(),
            total_requests: requests.len(),
            page_count: text.page_count,
            extraction_tier: text.tier,
            extractor: text.extractor,
            degraded: parser_used == PATTERN_PARSER && !self.backend.is_local(),
            parser_used,
            metadata,
            requests,
        })
    }

    /// Mandatory branch. Backend first; the pattern parser stands in when the
    /// backend fails or finds nothing and local fallback is enabled.
    fn extract_records(&self, full_text: &str) -> Result<(Vec<ExtractedRequest>, String), ProcessingError> {
        let remote = with_retry(&self.settings.retry, "extract_records", || {
            self.backend.extract_records(full_text)
        });

        let error = match remote {
            Ok(records) if !records.is_empty() => {
                tracing::info!(backend = self.backend.name(), count = records.len(), "Requests extracted");
                return Ok((records, self.backend.name().to_string()));
            }
            Ok(_) => None,
            Err(e) => Some(e),
        };

        if !self.settings.local_parser_fallback {
            return Err(error.map_or(ProcessingError::NoRecords, ProcessingError::RecordExtraction));
        }

        match &error {
            Some(e) => tracing::warn!(error = %e, "Backend request extraction failed, using pattern parser"),
            None => tracing::warn!("Backend found no requests, trying pattern parser"),
        }
        let records = parse_requests(full_text);
        if records.is_empty() {
            return Err(error.map_or(ProcessingError::NoRecords, ProcessingError::RecordExtraction));
        }
        tracing::info!(count = records.len(), "Requests extracted by pattern parser");
        Ok((records, PATTERN_PARSER.to_string()))
    }

    /// Optional branch, run on the worker pool while the runner thread does
    /// request extraction. The runner blocks on the channel, not on the pool.
    fn spawn_metadata(&self, pdf_bytes: &[u8]) -> mpsc::Receiver<Option<CaseMetadata>> {
        let (tx, rx) = mpsc::channel();
        let chain = Arc::clone(&self.chain);
        let backend = Arc::clone(&self.backend);
        let settings = self.settings;
        let pdf_bytes = pdf_bytes.to_vec();
        self.workers.spawn(move || {
            let _ = tx.send(extract_metadata(&chain, backend.as_ref(), &settings, &pdf_bytes));
        });
        rx
    }

    // ── Analysis ────────────────────────────────────────────

    fn analyze_session(
        &self,
        job_id: Uuid,
        session_id: &str,
        objections: Vec<ObjectionDef>,
    ) -> Result<AnalysisSummary, ProcessingError> {
        let session = self
            .store
            .get(session_id)?
            .ok_or_else(|| ProcessingError::SessionNotFound(session_id.to_string()))?;
        if session.records.is_empty() {
            return Err(ProcessingError::NothingToAnalyze);
        }

        let total = session.records.len();
        let chunks = self.engine.chunk_count(total);
        self.registry.set_running(
            job_id,
            Some(chunks),
            &format!("Analyzing {total} requests in {chunks} chunk(s)..."),
        )?;

        let context = AnalysisContext::new(session.documents.clone(), objections);
        let analyzer: Arc<dyn ChunkAnalyzer> =
            Arc::new(BackendAnalyzer::new(Arc::clone(&self.backend), context, self.settings.retry));
        let registry = &self.registry;
        let on_progress = |done: usize, of: usize| {
            registry.update_progress(job_id, done, &format!("Analyzed {done} of {of} chunks"));
        };
        let outcome = self.engine.analyze(&session.records, analyzer, &on_progress);

        let mut session = self
            .store
            .get(session_id)?
            .ok_or_else(|| ProcessingError::SessionNotFound(session_id.to_string()))?;
        let applied = session.apply_analysis(&outcome.results);
        session.analysis_complete = true;
        session.analysis_error = None;
        self.store.update(session)?;

        Ok(AnalysisSummary {
            session_id: session_id.to_string(),
            backend: self.backend.name().to_string(),
            total_requests: total,
            applied,
            chunks: outcome.chunks,
            fallback_entries: fallback_count(&outcome.results),
            failed_chunks: outcome
                .failed_chunks
                .iter()
                .map(|(chunk, reason)| FailedChunk {
                    chunk: *chunk,
                    reason: reason.to_string(),
                })
                .collect(),
            degraded: outcome.is_degraded(),
            suggestions: outcome.results,
        })
    }

    // ── Internal ────────────────────────────────────────────

    fn complete<T: Serialize>(
        &self,
        job_id: Uuid,
        summary: &T,
        degraded: bool,
        message: &str,
    ) -> Result<(), ProcessingError> {
        let value = serde_json::to_value(summary)?;
        self.registry.set_completed(job_id, value, degraded, message)?;
        Ok(())
    }

    fn fail(&self, job_id: Uuid, error: &ProcessingError) {
        if let Err(e) = self.registry.set_failed(job_id, &error.to_string()) {
            tracing::warn!(job_id = %job_id, error = %e, "Could not mark job failed");
        }
    }

    fn record_analysis_error(&self, session_id: &str, error: &ProcessingError) {
        let recorded = self.store.get(session_id).and_then(|session| match session {
            Some(mut session) => {
                session.analysis_complete = false;
                session.analysis_error = Some(error.to_string());
                self.store.update(session)
            }
            None => Ok(()),
        });
        if let Err(e) = recorded {
            tracing::warn!(session_id, error = %e, "Could not record analysis error on session");
        }
    }
}

/// Never fails the run: every problem, including a panic, ends as `None`.
fn extract_metadata(
    chain: &TextExtractionChain,
    backend: &dyn AiBackend,
    settings: &ProcessorSettings,
    pdf_bytes: &[u8],
) -> Option<CaseMetadata> {
    let attempt = catch_unwind(AssertUnwindSafe(|| {
        let text = chain.extract_first_pages(pdf_bytes, settings.metadata_pages);
        if text.trim().is_empty() {
            tracing::info!("No first-page text, skipping metadata extraction");
            return None;
        }

        match with_retry(&settings.retry, "extract_metadata", || backend.extract_metadata(&text)) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                tracing::warn!(error = %e, "Metadata extraction failed, continuing without it");
                None
            }
        }
    }));

    attempt.unwrap_or_else(|panic| {
        tracing::warn!(error = %panic_message(panic.as_ref()), "Metadata extraction panicked, continuing without it");
        None
    })
}

fn enter(job_id: Uuid, stage: PipelineStage) {
    tracing::info!(job_id = %job_id, stage = %stage, "Pipeline stage");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
