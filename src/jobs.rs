//! Job registry: in-memory bookkeeping for background pipeline and analysis runs.
//!
//! One mutex guards the whole map. Critical sections only touch the map;
//! no remote call ever runs while the lock is held. Writers are the runner
//! threads and the analysis engine's progress callback, readers are polling
//! clients.
//!
//! Lifecycle: `Pending → Running → {Completed | Failed}`. Terminal states are
//! final. Terminal jobs older than the TTL are removed on the next `create`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::DEFAULT_JOB_TTL_SECS;

/// Highest progress a job can report before it completes.
const RUNNING_PROGRESS_CAP: u8 = 99;

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

/// What a job is doing. Single-flight is enforced per session and kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Upload → text → records + metadata → session.
    Pipeline,
    /// Chunked objection analysis of a session's records.
    Analysis,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pipeline => write!(f, "pipeline"),
            Self::Analysis => write!(f, "analysis"),
        }
    }
}

/// A tracked background operation.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub session_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    /// 0–100. Never decreases while running; 100 only once completed.
    pub progress: u8,
    pub total_units: usize,
    pub completed_units: usize,
    pub message: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Completed, but some of the result came from local fallback.
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Creation order, breaks `created_at` ties in `get_by_session`.
    #[serde(skip)]
    seq: u64,
}

/// What a polling client sees. Result only when completed, error only when
/// failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub session_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: u8,
    pub total_units: usize,
    pub completed_units: usize,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            session_id: job.session_id.clone(),
            kind: job.kind,
            status: job.status,
            progress: job.progress,
            total_units: job.total_units,
            completed_units: job.completed_units,
            message: job.message.clone(),
            result: match job.status {
                JobStatus::Completed => job.result.clone(),
                _ => None,
            },
            error: match job.status {
                JobStatus::Failed => job.error.clone(),
                _ => None,
            },
            degraded: job.degraded,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Job counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Job {0} already finished")]
    AlreadyTerminal(Uuid),

    #[error("Session {session_id} already has an active {kind} job ({job_id})")]
    SessionBusy {
        session_id: String,
        kind: JobKind,
        job_id: Uuid,
    },

    #[error("Internal lock error")]
    LockPoisoned,
}

// ═══════════════════════════════════════════════════════════
// JobRegistry
// ═══════════════════════════════════════════════════════════

pub struct JobRegistry {
    jobs: Mutex<HashMap<Uuid, Job>>,
    ttl: Duration,
    next_seq: AtomicU64,
}

impl JobRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            ttl,
            next_seq: AtomicU64::new(0),
        }
    }

    /// Register a new `Pending` job. Expired terminal jobs are purged first.
    pub fn create(
        &self,
        job_id: Uuid,
        session_id: &str,
        kind: JobKind,
        total_units: usize,
    ) -> Result<JobSnapshot, RegistryError> {
        let mut jobs = self.lock()?;
        self.purge_locked(&mut jobs);
        Ok(self.insert_locked(&mut jobs, job_id, session_id, kind, total_units))
    }

    /// Like [`create`](Self::create), but refuses when the session already has
    /// a pending or running job of the same kind. Check and insert happen
    /// under one lock acquisition.
    pub fn create_exclusive(
        &self,
        job_id: Uuid,
        session_id: &str,
        kind: JobKind,
        total_units: usize,
    ) -> Result<JobSnapshot, RegistryError> {
        let mut jobs = self.lock()?;
        self.purge_locked(&mut jobs);

        if let Some(active) = jobs
            .values()
            .find(|j| j.session_id == session_id && j.kind == kind && j.status.is_active())
        {
            return Err(RegistryError::SessionBusy {
                session_id: session_id.to_string(),
                kind,
                job_id: active.id,
            });
        }

        Ok(self.insert_locked(&mut jobs, job_id, session_id, kind, total_units))
    }

    /// `Pending | Running → Running`. `total_units` replaces the planned
    /// amount when given.
    pub fn set_running(
        &self,
        job_id: Uuid,
        total_units: Option<usize>,
        message: &str,
    ) -> Result<(), RegistryError> {
        let mut jobs = self.lock()?;
        let job = jobs.get_mut(&job_id).ok_or(RegistryError::NotFound(job_id))?;
        if job.status.is_terminal() {
            return Err(RegistryError::AlreadyTerminal(job_id));
        }

        job.status = JobStatus::Running;
        if let Some(total) = total_units {
            job.total_units = total;
        }
        job.message = if message.is_empty() {
            format!("Processing {} unit(s)...", job.total_units)
        } else {
            message.to_string()
        };
        job.updated_at = Utc::now();
        tracing::info!(job_id = %job_id, kind = %job.kind, total_units = job.total_units, "Job started");
        Ok(())
    }

    /// Record progress. Silently ignored for unknown or finished jobs, so a
    /// late worker racing cleanup or completion is harmless.
    pub fn update_progress(&self, job_id: Uuid, completed_units: usize, message: &str) {
        let Ok(mut jobs) = self.jobs.lock() else {
            tracing::warn!(job_id = %job_id, "Job registry lock poisoned, progress dropped");
            return;
        };
        let Some(job) = jobs.get_mut(&job_id) else {
            return;
        };
        if job.status.is_terminal() {
            return;
        }

        let computed = compute_progress(completed_units, job.total_units);
        job.progress = job.progress.max(computed.min(RUNNING_PROGRESS_CAP));
        job.completed_units = job.completed_units.max(completed_units);
        job.message = if message.is_empty() {
            format!("Processing... ({}/{})", job.completed_units, job.total_units)
        } else {
            message.to_string()
        };
        job.updated_at = Utc::now();
        tracing::debug!(job_id = %job_id, progress = job.progress, message = %job.message, "Job progress");
    }

    /// Terminal success. `degraded` marks results that contain fallback output.
    pub fn set_completed(
        &self,
        job_id: Uuid,
        result: serde_json::Value,
        degraded: bool,
        message: &str,
    ) -> Result<(), RegistryError> {
        let mut jobs = self.lock()?;
        let job = jobs.get_mut(&job_id).ok_or(RegistryError::NotFound(job_id))?;
        if job.status.is_terminal() {
            return Err(RegistryError::AlreadyTerminal(job_id));
        }

        job.status = JobStatus::Completed;
        job.progress = 100;
        job.completed_units = job.total_units.max(job.completed_units);
        job.result = Some(result);
        job.degraded = degraded;
        job.message = if message.is_empty() {
            "Complete".to_string()
        } else {
            message.to_string()
        };
        job.updated_at = Utc::now();
        tracing::info!(job_id = %job_id, kind = %job.kind, degraded, "Job completed");
        Ok(())
    }

    /// Terminal failure with a human-readable error.
    pub fn set_failed(&self, job_id: Uuid, error: &str) -> Result<(), RegistryError> {
        let mut jobs = self.lock()?;
        let job = jobs.get_mut(&job_id).ok_or(RegistryError::NotFound(job_id))?;
        if job.status.is_terminal() {
            return Err(RegistryError::AlreadyTerminal(job_id));
        }

        job.status = JobStatus::Failed;
        job.error = Some(error.to_string());
        job.message = format!("Failed: {error}");
        job.updated_at = Utc::now();
        tracing::error!(job_id = %job_id, kind = %job.kind, error, "Job failed");
        Ok(())
    }

    pub fn get(&self, job_id: Uuid) -> Option<Job> {
        self.jobs.lock().ok()?.get(&job_id).cloned()
    }

    /// Most recently created job for a session.
    pub fn get_by_session(&self, session_id: &str) -> Option<Job> {
        self.jobs
            .lock()
            .ok()?
            .values()
            .filter(|j| j.session_id == session_id)
            .max_by_key(|j| (j.created_at, j.seq))
            .cloned()
    }

    pub fn snapshot(&self, job_id: Uuid) -> Option<JobSnapshot> {
        self.get(job_id).as_ref().map(JobSnapshot::from)
    }

    pub fn delete(&self, job_id: Uuid) -> bool {
        match self.jobs.lock() {
            Ok(mut jobs) => jobs.remove(&job_id).is_some(),
            Err(_) => false,
        }
    }

    pub fn stats(&self) -> JobStats {
        let mut stats = JobStats::default();
        if let Ok(jobs) = self.jobs.lock() {
            for job in jobs.values() {
                match job.status {
                    JobStatus::Pending => stats.pending += 1,
                    JobStatus::Running => stats.running += 1,
                    JobStatus::Completed => stats.completed += 1,
                    JobStatus::Failed => stats.failed += 1,
                }
            }
        }
        stats
    }

    /// Remove terminal jobs whose last update is older than the TTL.
    /// Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        match self.jobs.lock() {
            Ok(mut jobs) => self.purge_locked(&mut jobs),
            Err(_) => 0,
        }
    }

    // ── Internal ────────────────────────────────────────────

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Uuid, Job>>, RegistryError> {
        self.jobs.lock().map_err(|_| RegistryError::LockPoisoned)
    }

    fn insert_locked(
        &self,
        jobs: &mut HashMap<Uuid, Job>,
        job_id: Uuid,
        session_id: &str,
        kind: JobKind,
        total_units: usize,
    ) -> JobSnapshot {
        let now = Utc::now();
        let job = Job {
            id: job_id,
            session_id: session_id.to_string(),
            kind,
            status: JobStatus::Pending,
            progress: 0,
            total_units,
            completed_units: 0,
            message: "Queued".to_string(),
            result: None,
            error: None,
            degraded: false,
            created_at: now,
            updated_at: now,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        let snapshot = JobSnapshot::from(&job);
        jobs.insert(job_id, job);
        tracing::info!(job_id = %job_id, session_id, kind = %kind, "Created job");
        snapshot
    }

    fn purge_locked(&self, jobs: &mut HashMap<Uuid, Job>) -> usize {
        let Ok(ttl) = chrono::Duration::from_std(self.ttl) else {
            return 0;
        };
        let cutoff = Utc::now() - ttl;
        let before = jobs.len();
        jobs.retain(|_, j| !(j.status.is_terminal() && j.updated_at < cutoff));
        let removed = before - jobs.len();
        if removed > 0 {
            tracing::debug!(removed, "Purged expired jobs");
        }
        removed
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_JOB_TTL_SECS))
    }
}

/// floor(completed / total · 100), 0 when nothing is planned.
fn compute_progress(completed_units: usize, total_units: usize) -> u8 {
    if total_units == 0 {
        return 0;
    }
    let pct = completed_units.saturating_mul(100) / total_units;
    pct.min(100) as u8
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn registry() -> JobRegistry {
        JobRegistry::new(Duration::from_secs(3600))
    }

    fn new_job(reg: &JobRegistry, session: &str, total: usize) -> Uuid {
        let id = Uuid::new_v4();
        reg.create(id, session, JobKind::Analysis, total).unwrap();
        id
    }

    fn backdate(reg: &JobRegistry, id: Uuid, secs: i64) {
        let mut jobs = reg.jobs.lock().unwrap();
        let job = jobs.get_mut(&id).unwrap();
        job.updated_at -= chrono::Duration::seconds(secs);
        job.created_at -= chrono::Duration::seconds(secs);
    }

    #[test]
    fn create_starts_pending_at_zero() {
        let reg = registry();
        let id = new_job(&reg, "s1", 4);
        let job = reg.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.total_units, 4);
    }

    #[test]
    fn progress_is_floor_of_fraction() {
        let reg = registry();
        let id = new_job(&reg, "s1", 3);
        reg.set_running(id, None, "").unwrap();
        reg.update_progress(id, 1, "");
        assert_eq!(reg.get(id).unwrap().progress, 33);
        reg.update_progress(id, 2, "");
        assert_eq!(reg.get(id).unwrap().progress, 66);
    }

    #[test]
    fn progress_zero_when_no_units_planned() {
        let reg = registry();
        let id = new_job(&reg, "s1", 0);
        reg.set_running(id, None, "").unwrap();
        reg.update_progress(id, 5, "");
        assert_eq!(reg.get(id).unwrap().progress, 0);
    }

    #[test]
    fn progress_never_decreases() {
        let reg = registry();
        let id = new_job(&reg, "s1", 4);
        reg.set_running(id, None, "").unwrap();
        reg.update_progress(id, 3, "");
        reg.update_progress(id, 1, "late worker");
        let job = reg.get(id).unwrap();
        assert_eq!(job.progress, 75);
        assert_eq!(job.completed_units, 3);
        assert_eq!(job.message, "late worker");
    }

    #[test]
    fn progress_capped_below_100_until_completed() {
        let reg = registry();
        let id = new_job(&reg, "s1", 2);
        reg.set_running(id, None, "").unwrap();
        reg.update_progress(id, 2, "");
        assert_eq!(reg.get(id).unwrap().progress, 99);

        reg.set_completed(id, serde_json::json!({}), false, "").unwrap();
        assert_eq!(reg.get(id).unwrap().progress, 100);
    }

    #[test]
    fn update_progress_on_unknown_job_is_noop() {
        let reg = registry();
        reg.update_progress(Uuid::new_v4(), 1, "ghost");
        assert_eq!(reg.stats(), JobStats::default());
    }

    #[test]
    fn update_progress_on_terminal_job_is_noop() {
        let reg = registry();
        let id = new_job(&reg, "s1", 4);
        reg.set_running(id, None, "").unwrap();
        reg.update_progress(id, 1, "");
        reg.set_failed(id, "boom").unwrap();
        reg.update_progress(id, 4, "too late");

        let job = reg.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.progress, 25);
        assert_eq!(job.message, "Failed: boom");
    }

    #[test]
    fn terminal_states_are_final() {
        let reg = registry();
        let id = new_job(&reg, "s1", 1);
        reg.set_running(id, None, "").unwrap();
        reg.set_completed(id, serde_json::json!({"a": 1}), false, "").unwrap();

        assert!(matches!(reg.set_failed(id, "x"), Err(RegistryError::AlreadyTerminal(_))));
        assert!(matches!(
            reg.set_completed(id, serde_json::json!({}), false, ""),
            Err(RegistryError::AlreadyTerminal(_))
        ));
        assert!(matches!(reg.set_running(id, None, ""), Err(RegistryError::AlreadyTerminal(_))));
        assert_eq!(reg.get(id).unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn set_running_on_unknown_job_is_not_found() {
        let reg = registry();
        assert!(matches!(
            reg.set_running(Uuid::new_v4(), Some(1), ""),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn set_running_replaces_total_units() {
        let reg = registry();
        let id = new_job(&reg, "s1", 0);
        reg.set_running(id, Some(3), "").unwrap();
        let job = reg.get(id).unwrap();
        assert_eq!(job.total_units, 3);
        assert_eq!(job.message, "Processing 3 unit(s)...");
    }

    #[test]
    fn get_by_session_returns_latest_created() {
        let reg = registry();
        let older = new_job(&reg, "s1", 1);
        let newer = new_job(&reg, "s1", 1);
        let _other = new_job(&reg, "s2", 1);
        backdate(&reg, older, 10);

        assert_eq!(reg.get_by_session("s1").unwrap().id, newer);
        assert!(reg.get_by_session("missing").is_none());
    }

    #[test]
    fn get_by_session_breaks_timestamp_ties_by_creation_order() {
        let reg = registry();
        let first = new_job(&reg, "s1", 1);
        let second = new_job(&reg, "s1", 1);
        {
            let mut jobs = reg.jobs.lock().unwrap();
            let ts = jobs[&first].created_at;
            jobs.get_mut(&second).unwrap().created_at = ts;
        }
        assert_eq!(reg.get_by_session("s1").unwrap().id, second);
    }

    #[test]
    fn create_purges_expired_terminal_jobs() {
        let reg = registry();
        let done = new_job(&reg, "s1", 1);
        reg.set_failed(done, "x").unwrap();
        let stale_running = new_job(&reg, "s2", 1);
        reg.set_running(stale_running, None, "").unwrap();
        backdate(&reg, done, 7200);
        backdate(&reg, stale_running, 7200);

        let _fresh = new_job(&reg, "s3", 1);

        assert!(reg.get(done).is_none());
        assert!(reg.get(stale_running).is_some());
    }

    #[test]
    fn purge_expired_keeps_recent_terminal_jobs() {
        let reg = registry();
        let recent = new_job(&reg, "s1", 1);
        reg.set_completed(recent, serde_json::json!({}), false, "").unwrap();
        let old = new_job(&reg, "s1", 1);
        reg.set_completed(old, serde_json::json!({}), false, "").unwrap();
        backdate(&reg, old, 3601);

        assert_eq!(reg.purge_expired(), 1);
        assert!(reg.get(recent).is_some());
    }

    #[test]
    fn create_exclusive_rejects_second_active_job() {
        let reg = registry();
        let first = Uuid::new_v4();
        reg.create_exclusive(first, "s1", JobKind::Pipeline, 0).unwrap();

        let err = reg
            .create_exclusive(Uuid::new_v4(), "s1", JobKind::Pipeline, 0)
            .unwrap_err();
        match err {
            RegistryError::SessionBusy { job_id, .. } => assert_eq!(job_id, first),
            other => panic!("unexpected error: {other}"),
        }

        // Different kind or different session is fine
        reg.create_exclusive(Uuid::new_v4(), "s1", JobKind::Analysis, 0).unwrap();
        reg.create_exclusive(Uuid::new_v4(), "s2", JobKind::Pipeline, 0).unwrap();
    }

    #[test]
    fn create_exclusive_allows_rerun_after_terminal() {
        let reg = registry();
        let first = Uuid::new_v4();
        reg.create_exclusive(first, "s1", JobKind::Pipeline, 0).unwrap();
        reg.set_failed(first, "bad pdf").unwrap();
        assert!(reg.create_exclusive(Uuid::new_v4(), "s1", JobKind::Pipeline, 0).is_ok());
    }

    #[test]
    fn snapshot_hides_result_and_error_until_terminal() {
        let reg = registry();
        let id = new_job(&reg, "s1", 1);
        {
            let mut jobs = reg.jobs.lock().unwrap();
            jobs.get_mut(&id).unwrap().error = Some("stale".into());
        }
        assert!(reg.snapshot(id).unwrap().error.is_none());

        reg.set_running(id, None, "").unwrap();
        reg.set_completed(id, serde_json::json!({"1": {}}), true, "Analysis complete").unwrap();
        let snap = reg.snapshot(id).unwrap();
        assert_eq!(snap.result, Some(serde_json::json!({"1": {}})));
        assert!(snap.error.is_none());
        assert!(snap.degraded);
        assert_eq!(snap.message, "Analysis complete");
    }

    #[test]
    fn snapshot_serializes_snake_case_status() {
        let reg = registry();
        let id = new_job(&reg, "s1", 1);
        let json = serde_json::to_value(reg.snapshot(id).unwrap()).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["kind"], "analysis");
        assert!(json.get("result").is_none());
    }

    #[test]
    fn delete_and_stats() {
        let reg = registry();
        let a = new_job(&reg, "s1", 1);
        let b = new_job(&reg, "s1", 1);
        reg.set_running(b, None, "").unwrap();

        assert_eq!(reg.stats(), JobStats { pending: 1, running: 1, completed: 0, failed: 0 });
        assert!(reg.delete(a));
        assert!(!reg.delete(a));
        assert_eq!(reg.stats().pending, 0);
    }

    #[test]
    fn concurrent_progress_updates_stay_monotonic() {
        let reg = Arc::new(registry());
        let id = new_job(&reg, "s1", 100);
        reg.set_running(id, None, "").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || {
                    let mut last = 0;
                    for i in 0..50 {
                        reg.update_progress(id, (i * 7 + t) % 101, "");
                        let p = reg.get(id).unwrap().progress;
                        assert!(p >= last);
                        last = p;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert!(reg.get(id).unwrap().progress <= 99);
    }
}
