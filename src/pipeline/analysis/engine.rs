//! Chunked analysis engine.
//!
//! Records are split into contiguous chunks of at most `chunk_size` and each
//! chunk runs as a task on the shared worker pool, so concurrent outbound
//! calls never exceed the pool size. A chunk that errors, panics or overruns
//! its timeout is replaced by the analyzer's local fallback for exactly that
//! chunk's records. `analyze` is total: one entry per input record, whatever
//! happens to individual chunks.
//!
//! Chunk assignment is deterministic; completion order is not.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::ChunkAnalyzer;
use crate::config::{DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_TIMEOUT_SECS};
use crate::models::{AnalysisEntry, AnalysisMap, EntrySource, RequestRecord};
use crate::pipeline::panic_message;

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub chunk_size: usize,
    /// Bounded wait per chunk, measured from when a worker picks it up.
    pub chunk_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_timeout: Duration::from_secs(DEFAULT_CHUNK_TIMEOUT_SECS),
        }
    }
}

/// Why a chunk ended up on the fallback path.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum ChunkFailure {
    Service(String),
    Panicked(String),
    TimedOut,
    WorkerLost,
}

impl std::fmt::Display for ChunkFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Service(e) => write!(f, "{e}"),
            Self::Panicked(msg) => write!(f, "worker panicked: {msg}"),
            Self::TimedOut => write!(f, "timed out"),
            Self::WorkerLost => write!(f, "worker exited without a result"),
        }
    }
}

/// Merged result plus how it was obtained.
#[derive(Debug, Clone, Default)]
pub struct AnalysisOutcome {
    pub results: AnalysisMap,
    pub chunks: usize,
    /// (chunk index, reason) for every chunk answered by fallback.
    pub failed_chunks: Vec<(usize, ChunkFailure)>,
}

impl AnalysisOutcome {
    pub fn is_degraded(&self) -> bool {
        !self.failed_chunks.is_empty() || self.results.values().any(|e| e.is_fallback())
    }
}

enum WorkerEvent {
    Started(usize),
    Finished(usize, Result<AnalysisMap, ChunkFailure>),
}

// ═══════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════

pub struct AnalysisEngine {
    pool: Arc<rayon::ThreadPool>,
    config: EngineConfig,
}

impl AnalysisEngine {
    pub fn new(pool: Arc<rayon::ThreadPool>, config: EngineConfig) -> Self {
        Self { pool, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of chunks `n` records will be split into.
    pub fn chunk_count(&self, n: usize) -> usize {
        plan_chunks(n, self.config.chunk_size).len().max(1)
    }

    /// Analyze `records`. `on_progress(completed_chunks, total_chunks)` fires
    /// after every chunk, successful or not.
    pub fn analyze(
        &self,
        records: &[RequestRecord],
        analyzer: Arc<dyn ChunkAnalyzer>,
        on_progress: &(dyn Fn(usize, usize) + Sync),
    ) -> AnalysisOutcome {
        if records.is_empty() {
            return AnalysisOutcome::default();
        }

        if records.len() <= self.config.chunk_size {
            return self.analyze_inline(records, analyzer.as_ref(), on_progress);
        }

        let ranges = plan_chunks(records.len(), self.config.chunk_size);
        let total = ranges.len();
        tracing::info!(
            records = records.len(),
            chunks = total,
            chunk_size = self.config.chunk_size,
            workers = total.min(self.pool.current_num_threads()),
            "Analyzing in parallel chunks"
        );

        let (tx, rx) = mpsc::channel::<WorkerEvent>();
        for (idx, range) in ranges.iter().enumerate() {
            let chunk = records[range.clone()].to_vec();
            let analyzer = Arc::clone(&analyzer);
            let tx = tx.clone();
            self.pool.spawn(move || {
                let _ = tx.send(WorkerEvent::Started(idx));
                let result = run_chunk(analyzer.as_ref(), &chunk);
                // Receiver may be gone if this chunk already timed out
                let _ = tx.send(WorkerEvent::Finished(idx, result));
            });
        }
        drop(tx);

        let mut outcome = AnalysisOutcome {
            results: AnalysisMap::with_capacity(records.len()),
            chunks: total,
            failed_chunks: Vec::new(),
        };
        let mut started: HashMap<usize, Instant> = HashMap::new();
        let mut done = vec![false; total];
        let mut completed = 0;

        while completed < total {
            let event = match self.next_deadline(&started, &done) {
                Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match event {
                Ok(WorkerEvent::Started(idx)) => {
                    started.insert(idx, Instant::now());
                }
                Ok(WorkerEvent::Finished(idx, result)) => {
                    if done[idx] {
                        tracing::debug!(chunk = idx, "Discarding late chunk result");
                        continue;
                    }
                    done[idx] = true;
                    completed += 1;
                    let chunk = &records[ranges[idx].clone()];
                    self.merge(&mut outcome, idx, chunk, result, analyzer.as_ref());
                    on_progress(completed, total);
                }
                Err(RecvTimeoutError::Timeout) => {
                    let now = Instant::now();
                    let expired: Vec<usize> = started
                        .iter()
                        .filter(|(idx, at)| !done[**idx] && now.duration_since(**at) >= self.config.chunk_timeout)
                        .map(|(idx, _)| *idx)
                        .collect();
                    for idx in expired {
                        done[idx] = true;
                        completed += 1;
                        let chunk = &records[ranges[idx].clone()];
                        self.merge(&mut outcome, idx, chunk, Err(ChunkFailure::TimedOut), analyzer.as_ref());
                        on_progress(completed, total);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    for idx in 0..total {
                        if done[idx] {
                            continue;
                        }
                        done[idx] = true;
                        completed += 1;
                        let chunk = &records[ranges[idx].clone()];
                        self.merge(&mut outcome, idx, chunk, Err(ChunkFailure::WorkerLost), analyzer.as_ref());
                        on_progress(completed, total);
                    }
                }
            }
        }

        tracing::info!(
            results = outcome.results.len(),
            fallback_chunks = outcome.failed_chunks.len(),
            "Analysis complete"
        );
        outcome
    }

    // ── Internal ────────────────────────────────────────────

    /// Single chunk on the calling thread, no pool hop.
    fn analyze_inline(
        &self,
        records: &[RequestRecord],
        analyzer: &dyn ChunkAnalyzer,
        on_progress: &(dyn Fn(usize, usize) + Sync),
    ) -> AnalysisOutcome {
        let mut outcome = AnalysisOutcome {
            results: AnalysisMap::with_capacity(records.len()),
            chunks: 1,
            failed_chunks: Vec::new(),
        };
        let result = run_chunk(analyzer, records);
        self.merge(&mut outcome, 0, records, result, analyzer);
        on_progress(1, 1);
        outcome
    }

    fn next_deadline(&self, started: &HashMap<usize, Instant>, done: &[bool]) -> Option<Instant> {
        started
            .iter()
            .filter(|(idx, _)| !done[**idx])
            .map(|(_, at)| *at + self.config.chunk_timeout)
            .min()
    }

    /// Fold one chunk's result into the accumulator. Only keys belonging to
    /// the chunk are taken; records the backend skipped get fallback entries.
    fn merge(
        &self,
        outcome: &mut AnalysisOutcome,
        idx: usize,
        chunk: &[RequestRecord],
        result: Result<AnalysisMap, ChunkFailure>,
        analyzer: &dyn ChunkAnalyzer,
    ) {
        let numbers: HashSet<&str> = chunk.iter().map(|r| r.number.as_str()).collect();

        let mut partial = match result {
            Ok(map) => {
                tracing::info!(chunk = idx, results = map.len(), "Chunk analyzed");
                map
            }
            Err(failure) => {
                tracing::warn!(chunk = idx, records = chunk.len(), error = %failure, "Chunk failed, using fallback");
                outcome.failed_chunks.push((idx, failure));
                AnalysisMap::new()
            }
        };
        partial.retain(|number, _| numbers.contains(number.as_str()));

        let missing: Vec<RequestRecord> = chunk
            .iter()
            .filter(|r| !partial.contains_key(&r.number))
            .cloned()
            .collect();
        if !missing.is_empty() {
            if missing.len() < chunk.len() {
                tracing::warn!(chunk = idx, missing = missing.len(), "Backend omitted records, filling from fallback");
            }
            partial.extend(run_fallback(analyzer, idx, &missing));
        }

        outcome.results.extend(partial);
    }
}

/// Contiguous index ranges of at most `chunk_size` covering `0..n` in order.
pub fn plan_chunks(n: usize, chunk_size: usize) -> Vec<Range<usize>> {
    let size = chunk_size.max(1);
    (0..n).step_by(size).map(|start| start..(start + size).min(n)).collect()
}

fn run_chunk(analyzer: &dyn ChunkAnalyzer, chunk: &[RequestRecord]) -> Result<AnalysisMap, ChunkFailure> {
    match catch_unwind(AssertUnwindSafe(|| analyzer.analyze_chunk(chunk))) {
        Ok(Ok(map)) => Ok(map),
        Ok(Err(e)) => Err(ChunkFailure::Service(e.to_string())),
        Err(panic) => Err(ChunkFailure::Panicked(panic_message(panic.as_ref()))),
    }
}

/// The analyzer's fallback, kept total: a panic or a skipped record leaves a
/// bare fallback entry with no suggestions.
fn run_fallback(analyzer: &dyn ChunkAnalyzer, idx: usize, missing: &[RequestRecord]) -> AnalysisMap {
    let mut map = catch_unwind(AssertUnwindSafe(|| analyzer.fallback_chunk(missing))).unwrap_or_else(|panic| {
        tracing::error!(chunk = idx, error = %panic_message(panic.as_ref()), "Fallback analysis panicked");
        AnalysisMap::new()
    });
    for record in missing {
        map.entry(record.number.clone()).or_insert_with(|| AnalysisEntry {
            notes: "Automatic analysis unavailable for this request.".to_string(),
            source: EntrySource::Fallback,
            ..Default::default()
        });
    }
    map
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
