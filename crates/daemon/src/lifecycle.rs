//! Stream lifecycle manager: the sole writer of job status.
//!
//! Combines job store writes with supervisor actions so that every job moves
//! `pending -> active -> {stopped, error}` and never gets stuck or orphaned.
//! Operations on the same job id are serialized through a per-job lock
//! registry that the retention sweeper shares.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::store::{now_ms, Job, JobStatus, JobStore, StoreError, StreamQuality};
use crate::supervisor::{cleanup_stream_files, stream_disk_usage, ProcessSupervisor};

/// Error type for lifecycle operations
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Malformed create input
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Operation on an unknown job id
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Operation not permitted in the job's current status
    #[error("Job {id} is not active (status: {status})")]
    InvalidState { id: String, status: JobStatus },

    /// Job store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Input for creating a new conversion job.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateJobRequest {
    pub name: Option<String>,
    pub source_url: String,
    pub quality: StreamQuality,
}

/// Per-job-id async mutex registry.
///
/// `create`/`stop`/`delete` and the retention sweeper all acquire the same
/// lock for a given id, so two concurrent operations can never double-launch
/// or double-terminate the same job. Entries are dropped once a job is
/// deleted.
#[derive(Default)]
pub struct JobLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl JobLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for one job id, waiting if another operation holds it.
    pub async fn acquire(&self, job_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap();
            map.entry(job_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop the registry entry for a deleted job.
    pub fn forget(&self, job_id: &str) {
        self.inner.lock().unwrap().remove(job_id);
    }
}

/// Orchestrates job state transitions.
pub struct LifecycleManager {
    store: Arc<JobStore>,
    supervisor: Arc<ProcessSupervisor>,
    locks: Arc<JobLocks>,
    output_dir: PathBuf,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<JobStore>,
        supervisor: Arc<ProcessSupervisor>,
        locks: Arc<JobLocks>,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            supervisor,
            locks,
            output_dir,
        }
    }

    /// Create a job and launch its encoder.
    ///
    /// The record is written as `pending`, then moved to `active` (with
    /// output paths and `started_at`) once the encoder is up. A launch
    /// failure is recovered locally: the record moves to `error` and is
    /// returned to the caller rather than surfaced as a failure. The
    /// returned job is never still `pending`.
    pub async fn create(&self, req: CreateJobRequest) -> Result<Job, LifecycleError> {
        if req.source_url.trim().is_empty() {
            return Err(LifecycleError::Validation(
                "source_url must not be empty".to_string(),
            ));
        }

        let job = Job::new(req.name, req.source_url, req.quality);
        let _guard = self.locks.acquire(&job.id).await;

        self.store.insert(job.clone())?;

        match self
            .supervisor
            .launch(&job.id, &job.source_url, job.quality, &self.output_dir)
        {
            Ok(outputs) => {
                info!(job_id = %job.id, quality = %job.quality, "encoder launched");
                let updated = self.store.update(&job.id, |j| {
                    j.mark_active(outputs.hls_path, outputs.dash_path, now_ms())
                })?;
                Ok(updated.unwrap_or(job))
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "encoder launch failed");
                let updated = self.store.update(&job.id, |j| j.mark_error())?;
                Ok(updated.unwrap_or_else(|| {
                    let mut j = job;
                    j.mark_error();
                    j
                }))
            }
        }
    }

    /// Stop an active job's encoder and mark the record `stopped`.
    ///
    /// The supervisor reporting no registered process (the encoder already
    /// exited on its own) is tolerated; the record still transitions.
    pub async fn stop(&self, job_id: &str) -> Result<Job, LifecycleError> {
        let _guard = self.locks.acquire(job_id).await;

        let job = self
            .store
            .get(job_id)
            .ok_or_else(|| LifecycleError::NotFound(job_id.to_string()))?;

        if job.status != JobStatus::Active {
            return Err(LifecycleError::InvalidState {
                id: job_id.to_string(),
                status: job.status,
            });
        }

        if !self.supervisor.terminate(job_id) {
            debug!(job_id, "no live process registered at stop");
        }

        let updated = self
            .store
            .update(job_id, |j| j.mark_stopped(now_ms()))?
            .ok_or_else(|| LifecycleError::NotFound(job_id.to_string()))?;

        info!(job_id, "job stopped");
        Ok(updated)
    }

    /// Tear a job down completely: terminate its encoder if one is live,
    /// remove its output files by id prefix, and delete the record.
    ///
    /// File cleanup is best-effort; a partial teardown is logged but never
    /// blocks record deletion. Returns whether the record existed.
    pub async fn delete(&self, job_id: &str) -> Result<bool, LifecycleError> {
        let _guard = self.locks.acquire(job_id).await;

        let job = self
            .store
            .get(job_id)
            .ok_or_else(|| LifecycleError::NotFound(job_id.to_string()))?;

        if job.is_active && !self.supervisor.terminate(job_id) {
            debug!(job_id, "no live process registered at delete");
        }

        let cleanup = cleanup_stream_files(&self.output_dir, job_id);
        if cleanup.failed > 0 {
            warn!(
                job_id,
                failed = cleanup.failed,
                "partial teardown: some stream files could not be removed"
            );
        }
        debug!(job_id, removed = cleanup.removed, "stream files removed");

        let existed = self.store.remove(job_id)?;
        self.locks.forget(job_id);

        info!(job_id, "job deleted");
        Ok(existed)
    }

    /// Refresh the observed usage counters of every active job: elapsed
    /// duration since launch and on-disk footprint by id prefix. Both are
    /// kept non-decreasing so segment rotation cannot shrink them; stopped
    /// jobs stay frozen.
    pub fn refresh_usage(&self) {
        for job in self.store.active() {
            let disk = stream_disk_usage(&self.output_dir, &job.id);
            let elapsed_secs = job
                .started_at
                .map(|started| ((now_ms() - started).max(0) as u64) / 1000)
                .unwrap_or(0);

            let result = self.store.update(&job.id, |j| {
                if j.is_active {
                    j.duration_seconds = j.duration_seconds.max(elapsed_secs);
                    j.file_size_bytes = j.file_size_bytes.max(disk);
                }
            });
            if let Err(e) = result {
                warn!(job_id = %job.id, error = %e, "failed to refresh job usage");
            }
        }
    }
}
