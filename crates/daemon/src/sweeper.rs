//! Retention sweeper: periodically tears down jobs past the retention window.
//!
//! Expired jobs go through the full teardown (process, files, record) under
//! the same per-job locks as the manual lifecycle operations, so a sweep can
//! never race a concurrent stop or delete on the same id. Cleanup is
//! best-effort throughout; an orphaned file is an accepted, logged
//! degradation, never a reason to keep an expired record around.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::lifecycle::JobLocks;
use crate::store::{now_ms, JobStore};
use crate::supervisor::{cleanup_stream_files, ProcessSupervisor};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Counters from one sweep run, for logs and the administrative endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    /// Jobs found past the retention window
    pub expired: usize,
    /// Encoder processes terminated during teardown
    pub terminated: usize,
    /// Output files removed
    pub files_removed: usize,
    /// Output files that could not be removed (left as orphans)
    pub files_failed: usize,
    /// Store records deleted in the final batch
    pub records_deleted: usize,
}

/// Discovers and tears down expired jobs.
pub struct RetentionSweeper {
    store: Arc<JobStore>,
    supervisor: Arc<ProcessSupervisor>,
    locks: Arc<JobLocks>,
    output_dir: PathBuf,
    window_ms: i64,
}

impl RetentionSweeper {
    pub fn new(
        store: Arc<JobStore>,
        supervisor: Arc<ProcessSupervisor>,
        locks: Arc<JobLocks>,
        output_dir: PathBuf,
        window_days: u32,
    ) -> Self {
        Self {
            store,
            supervisor,
            locks,
            output_dir,
            window_ms: i64::from(window_days) * DAY_MS,
        }
    }

    /// The creation-time cutoff: jobs created before this are expired.
    pub fn retention_cutoff(&self) -> i64 {
        now_ms() - self.window_ms
    }

    /// Run one sweep: terminate and clean up every expired job, then
    /// batch-delete the expired records.
    ///
    /// Idempotent: with no new expirations, a second run finds no
    /// candidates and changes nothing. A candidate deleted concurrently by
    /// a manual request is simply skipped once its lock is acquired.
    pub async fn sweep(&self) -> SweepSummary {
        let cutoff = self.retention_cutoff();
        let candidates = self.store.expired(cutoff);

        let mut summary = SweepSummary {
            expired: candidates.len(),
            ..Default::default()
        };

        for candidate in &candidates {
            let _guard = self.locks.acquire(&candidate.id).await;

            // Re-read under the lock; a concurrent delete may have won.
            let Some(job) = self.store.get(&candidate.id) else {
                continue;
            };

            if job.is_active && self.supervisor.terminate(&job.id) {
                summary.terminated += 1;
            }

            // No status update: the record is deleted below anyway.
            let cleanup = cleanup_stream_files(&self.output_dir, &job.id);
            summary.files_removed += cleanup.removed;
            summary.files_failed += cleanup.failed;
        }

        match self.store.remove_expired(cutoff) {
            Ok(n) => summary.records_deleted = n,
            Err(e) => warn!(error = %e, "failed to batch-delete expired records"),
        }

        for candidate in &candidates {
            self.locks.forget(&candidate.id);
        }

        if summary.files_failed > 0 {
            warn!(
                files_failed = summary.files_failed,
                "partial teardown: some expired stream files could not be removed"
            );
        }
        info!(
            expired = summary.expired,
            terminated = summary.terminated,
            files_removed = summary.files_removed,
            records_deleted = summary.records_deleted,
            "retention sweep finished"
        );
        summary
    }

    /// Spawn the fixed-schedule sweep loop. The first sweep runs one full
    /// interval after startup.
    pub fn start_scheduler(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let sweeper = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // interval fires immediately; consume that tick so the schedule
            // starts one period out
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sweeper.sweep().await;
            }
        })
    }
}
