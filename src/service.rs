//! Service facade: the interface a boundary layer (HTTP, CLI) calls.
//!
//! `PipelineService` is constructed explicitly and owns everything a run
//! needs: the job registry, the runner pool that hosts whole runs, the
//! shared worker pool for per-chunk and fan-out tasks, and the
//! collaborators. Starting a run returns a job id immediately; progress and
//! results are read back with `poll`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::config::{PipelineSettings, DEFAULT_PRESET_ID};
use crate::jobs::{JobKind, JobRegistry, JobSnapshot, JobStats, RegistryError};
use crate::models::ObjectionDef;
use crate::pipeline::ai::{AiBackend, AnthropicBackend, BackendError, LocalBackend};
use crate::pipeline::analysis::EngineConfig;
use crate::pipeline::extraction::TextExtractionChain;
use crate::pipeline::{build_pool, PipelineProcessor, ProcessorSettings, UploadedFile, PIPELINE_STEPS};
use crate::presets::{BuiltinPresets, DirectoryPresets, PresetError, PresetProvider};
use crate::session_store::{SessionStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid file type: {0}. Only PDF files are allowed.")]
    NotPdf(String),

    #[error("Uploaded file is empty")]
    EmptyFile,

    #[error("No requests to analyze in session {0}")]
    NoRecords(String),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("No job found for session {0}")]
    NoJobForSession(String),

    #[error("Timed out waiting for job {0}")]
    WaitTimedOut(Uuid),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Preset(#[from] PresetError),

    #[error("Backend setup failed: {0}")]
    Backend(#[from] BackendError),

    #[error("Thread pool setup failed: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl ServiceError {
    /// True when the caller should retry later rather than fix the request.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Registry(RegistryError::SessionBusy { .. }))
    }
}

// ═══════════════════════════════════════════════════════════
// PipelineService
// ═══════════════════════════════════════════════════════════

pub struct PipelineService {
    registry: Arc<JobRegistry>,
    store: Arc<dyn SessionStore>,
    presets: Arc<dyn PresetProvider>,
    processor: Arc<PipelineProcessor>,
    runners: rayon::ThreadPool,
}

impl PipelineService {
    /// Wire a service from explicit collaborators.
    pub fn new(
        settings: &PipelineSettings,
        backend: Arc<dyn AiBackend>,
        chain: TextExtractionChain,
        store: Arc<dyn SessionStore>,
        presets: Arc<dyn PresetProvider>,
    ) -> Result<Self, ServiceError> {
        let registry = Arc::new(JobRegistry::new(settings.job_ttl));
        let workers = Arc::new(build_pool(settings.max_workers, "pipeline-worker")?);
        let runners = build_pool(settings.pipeline_runners, "pipeline-runner")?;

        let processor = PipelineProcessor::new(
            chain,
            backend,
            Arc::clone(&store),
            Arc::clone(&registry),
            workers,
            EngineConfig {
                chunk_size: settings.chunk_size,
                chunk_timeout: settings.chunk_timeout,
            },
            ProcessorSettings::from(settings),
        );

        tracing::info!(
            backend = processor.backend_name(),
            workers = settings.max_workers,
            runners = settings.pipeline_runners,
            chunk_size = settings.chunk_size,
            "Pipeline service ready"
        );

        Ok(Self {
            registry,
            store,
            presets,
            processor: Arc::new(processor),
            runners,
        })
    }

    /// Default collaborators for `settings`: the Anthropic backend when an
    /// API key is set (local heuristics otherwise), the pdf-extract/lopdf
    /// chain, and directory presets when a presets folder is configured.
    pub fn from_settings(settings: &PipelineSettings, store: Arc<dyn SessionStore>) -> Result<Self, ServiceError> {
        let backend: Arc<dyn AiBackend> = match &settings.api_key {
            Some(key) => Arc::new(AnthropicBackend::new(
                &settings.api_base_url,
                key,
                &settings.model,
                settings.request_timeout,
            )?),
            None => {
                tracing::warn!("ANTHROPIC_API_KEY not set, using local heuristic backend");
                Arc::new(LocalBackend)
            }
        };

        let presets: Arc<dyn PresetProvider> = match &settings.presets_folder {
            Some(dir) => Arc::new(DirectoryPresets::new(dir)),
            None => Arc::new(BuiltinPresets),
        };

        Self::new(
            settings,
            backend,
            TextExtractionChain::with_defaults(settings.min_text_chars),
            store,
            presets,
        )
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn backend_name(&self) -> &str {
        self.processor.backend_name()
    }

    /// Validate the upload, register a pipeline job and queue the run.
    /// Returns without waiting for any of the work.
    pub fn start_pipeline(&self, session_id: &str, upload: UploadedFile) -> Result<Uuid, ServiceError> {
        if !upload.is_pdf() {
            return Err(ServiceError::NotPdf(upload.filename));
        }
        if upload.bytes.is_empty() {
            return Err(ServiceError::EmptyFile);
        }
        self.require_session(session_id)?;

        let job_id = Uuid::new_v4();
        self.registry
            .create_exclusive(job_id, session_id, JobKind::Pipeline, PIPELINE_STEPS)?;

        let processor = Arc::clone(&self.processor);
        let session = session_id.to_string();
        self.runners.spawn(move || {
            processor.run_pipeline(job_id, &session, &upload);
        });

        tracing::info!(job_id = %job_id, session_id, "Pipeline job queued");
        Ok(job_id)
    }

    /// Queue an analysis of every record in the session against `objections`.
    pub fn analyze(&self, session_id: &str, objections: Vec<ObjectionDef>) -> Result<Uuid, ServiceError> {
        let session = self.require_session(session_id)?;
        if session.records.is_empty() {
            return Err(ServiceError::NoRecords(session_id.to_string()));
        }

        let job_id = Uuid::new_v4();
        let chunks = self.processor.chunk_count(session.records.len());
        self.registry
            .create_exclusive(job_id, session_id, JobKind::Analysis, chunks)?;

        let processor = Arc::clone(&self.processor);
        let session = session_id.to_string();
        self.runners.spawn(move || {
            processor.run_analysis(job_id, &session, objections);
        });

        tracing::info!(job_id = %job_id, session_id, chunks, "Analysis job queued");
        Ok(job_id)
    }

    /// [`analyze`](Self::analyze) with the session's objection preset. An
    /// unknown preset falls back to the default one.
    pub fn analyze_with_preset(&self, session_id: &str) -> Result<Uuid, ServiceError> {
        let session = self.require_session(session_id)?;
        let objections = match self.presets.load(&session.objection_preset_id) {
            Ok(objections) => objections,
            Err(PresetError::NotFound(id)) if id != DEFAULT_PRESET_ID => {
                tracing::warn!(preset_id = %id, "Preset not found, using default");
                self.presets.load(DEFAULT_PRESET_ID)?
            }
            Err(e) => return Err(e.into()),
        };
        self.analyze(session_id, objections)
    }

    pub fn poll(&self, job_id: Uuid) -> Result<JobSnapshot, ServiceError> {
        self.registry.snapshot(job_id).ok_or(ServiceError::JobNotFound(job_id))
    }

    /// Latest job of any kind for the session.
    pub fn poll_session(&self, session_id: &str) -> Result<JobSnapshot, ServiceError> {
        self.registry
            .get_by_session(session_id)
            .map(|job| JobSnapshot::from(&job))
            .ok_or_else(|| ServiceError::NoJobForSession(session_id.to_string()))
    }

    /// Poll until the job is terminal, calling `on_update` whenever the
    /// message or progress changes.
    pub fn wait(
        &self,
        job_id: Uuid,
        interval: Duration,
        timeout: Duration,
        mut on_update: impl FnMut(&JobSnapshot),
    ) -> Result<JobSnapshot, ServiceError> {
        let deadline = Instant::now() + timeout;
        let mut last: Option<(u8, String)> = None;
        loop {
            let snapshot = self.poll(job_id)?;
            let seen = (snapshot.progress, snapshot.message.clone());
            if last.as_ref() != Some(&seen) {
                on_update(&snapshot);
                last = Some(seen);
            }
            if snapshot.status.is_terminal() {
                return Ok(snapshot);
            }
            if Instant::now() >= deadline {
                return Err(ServiceError::WaitTimedOut(job_id));
            }
            std::thread::sleep(interval);
        }
    }

    pub fn stats(&self) -> JobStats {
        self.registry.stats()
    }

    // ── Internal ────────────────────────────────────────────

    fn require_session(&self, session_id: &str) -> Result<crate::models::Session, ServiceError> {
        self.store
            .get(session_id)?
            .ok_or_else(|| ServiceError::SessionNotFound(session_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobStatus;
    use crate::models::{AnalysisMap, CaseMetadata, ExtractedRequest, RequestRecord};
    use crate::pipeline::ai::AnalysisContext;
    use crate::pipeline::extraction::{ExtractionError, PageTextExtractor};
    use crate::session_store::InMemorySessionStore;

    struct FixedPages(&'static str);

    impl PageTextExtractor for FixedPages {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn extract_pages(&self, _pdf_bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
            Ok(vec![self.0.to_string()])
        }
    }

    const TEXT: &str = "REQUEST NO. 1: All leases for the property at 12 Elm Street.\n\
        REQUEST NO. 2: All documents relating to rent payments since 2019.";

    fn service(store: Arc<InMemorySessionStore>) -> PipelineService {
        let settings = PipelineSettings {
            max_workers: 2,
            pipeline_runners: 1,
            ..Default::default()
        };
        PipelineService::new(
            &settings,
            Arc::new(LocalBackend),
            TextExtractionChain::new(Box::new(FixedPages(TEXT)), Box::new(FixedPages(TEXT)), 10),
            store,
            Arc::new(BuiltinPresets),
        )
        .unwrap()
    }

    fn wait(service: &PipelineService, job: Uuid) -> JobSnapshot {
        service
            .wait(job, Duration::from_millis(5), Duration::from_secs(10), |_| {})
            .unwrap()
    }

    #[test]
    fn pipeline_then_analysis() {
        let store = Arc::new(InMemorySessionStore::new());
        let session_id = store.create().unwrap().id;
        let service = service(store.clone());

        let job = service
            .start_pipeline(&session_id, UploadedFile::new("rfp.pdf", b"%PDF".to_vec()))
            .unwrap();
        let done = wait(&service, job);
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.result.unwrap()["total_requests"], 2);

        let job = service.analyze_with_preset(&session_id).unwrap();
        let done = wait(&service, job);
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.degraded, "local backend output is fallback-derived");

        let session = store.get(&session_id).unwrap().unwrap();
        assert!(session.analysis_complete);
        assert!(session.records.iter().all(|r| !r.ai_notes.is_empty()));
        assert_eq!(service.poll_session(&session_id).unwrap().job_id, job);
    }

    #[test]
    fn rejects_non_pdf_and_empty_uploads() {
        let store = Arc::new(InMemorySessionStore::new());
        let session_id = store.create().unwrap().id;
        let service = service(store);

        let err = service
            .start_pipeline(&session_id, UploadedFile::new("notes.docx", b"x".to_vec()))
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotPdf(_)));

        let err = service
            .start_pipeline(&session_id, UploadedFile::new("rfp.pdf", Vec::new()))
            .unwrap_err();
        assert!(matches!(err, ServiceError::EmptyFile));
        assert_eq!(service.stats(), JobStats::default());
    }

    #[test]
    fn unknown_session_is_rejected_before_a_job_exists() {
        let service = service(Arc::new(InMemorySessionStore::new()));
        let err = service
            .start_pipeline("ghost", UploadedFile::new("rfp.pdf", b"%PDF".to_vec()))
            .unwrap_err();
        assert!(matches!(err, ServiceError::SessionNotFound(_)));
        assert!(matches!(service.poll_session("ghost"), Err(ServiceError::NoJobForSession(_))));
    }

    #[test]
    fn second_active_run_for_session_is_busy() {
        let store = Arc::new(InMemorySessionStore::new());
        let session_id = store.create().unwrap().id;
        let service = service(store);

        let held = Uuid::new_v4();
        service
            .registry()
            .create_exclusive(held, &session_id, JobKind::Pipeline, 1)
            .unwrap();

        let err = service
            .start_pipeline(&session_id, UploadedFile::new("rfp.pdf", b"%PDF".to_vec()))
            .unwrap_err();
        assert!(err.is_busy());
        assert!(matches!(
            err,
            ServiceError::Registry(RegistryError::SessionBusy { job_id, .. }) if job_id == held
        ));
    }

    #[test]
    fn analysis_requires_records() {
        let store = Arc::new(InMemorySessionStore::new());
        let session_id = store.create().unwrap().id;
        let service = service(store);
        assert!(matches!(service.analyze(&session_id, Vec::new()), Err(ServiceError::NoRecords(_))));
    }

    #[test]
    fn unknown_preset_falls_back_to_default() {
        let store = Arc::new(InMemorySessionStore::new());
        let mut session = store.create().unwrap();
        session.objection_preset_id = "does_not_exist".into();
        session.records.push(RequestRecord::new(1, "1", "Any and all leases."));
        store.update(session.clone()).unwrap();
        let service = service(store);

        let job = service.analyze_with_preset(&session.id).unwrap();
        assert_eq!(wait(&service, job).status, JobStatus::Completed);
    }

    /// Records take a moment, analysis takes much longer.
    struct UnevenBackend;

    impl AiBackend for UnevenBackend {
        fn name(&self) -> &str {
            "uneven"
        }

        fn extract_records(&self, text: &str) -> Result<Vec<ExtractedRequest>, BackendError> {
            std::thread::sleep(Duration::from_millis(300));
            LocalBackend.extract_records(text)
        }

        fn extract_metadata(&self, text: &str) -> Result<CaseMetadata, BackendError> {
            LocalBackend.extract_metadata(text)
        }

        fn analyze(&self, records: &[RequestRecord], ctx: &AnalysisContext) -> Result<AnalysisMap, BackendError> {
            std::thread::sleep(Duration::from_secs(3));
            LocalBackend.analyze(records, ctx)
        }
    }

    #[test]
    fn pipeline_is_not_held_up_by_an_unrelated_analysis() {
        let store = Arc::new(InMemorySessionStore::new());
        let first = store.create().unwrap().id;
        let mut second = store.create().unwrap();
        second.records.push(RequestRecord::new(1, "1", "Any and all leases."));
        store.update(second.clone()).unwrap();

        let settings = PipelineSettings {
            max_workers: 2,
            pipeline_runners: 2,
            ..Default::default()
        };
        let service = PipelineService::new(
            &settings,
            Arc::new(UnevenBackend),
            TextExtractionChain::new(Box::new(FixedPages(TEXT)), Box::new(FixedPages(TEXT)), 10),
            store,
            Arc::new(BuiltinPresets),
        )
        .unwrap();

        let started = Instant::now();
        let pipeline = service
            .start_pipeline(&first, UploadedFile::new("rfp.pdf", b"%PDF".to_vec()))
            .unwrap();
        std::thread::sleep(Duration::from_millis(50));
        let analysis = service.analyze_with_preset(&second.id).unwrap();

        let done = wait(&service, pipeline);
        let elapsed = started.elapsed();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(elapsed < Duration::from_millis(2000), "pipeline took {elapsed:?}");
        assert_eq!(wait(&service, analysis).status, JobStatus::Completed);
    }

    #[test]
    fn poll_unknown_job() {
        let service = service(Arc::new(InMemorySessionStore::new()));
        let id = Uuid::new_v4();
        assert!(matches!(service.poll(id), Err(ServiceError::JobNotFound(j)) if j == id));
    }
}
