//! Job store module for persisting and querying conversion jobs.
//!
//! Jobs are persisted as JSON files in a configured state directory, one
//! `{id}.json` per job, with an in-memory index for filtering and ordering.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// Error type for job store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Status of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job record created, encoder not launched yet.
    Pending,
    /// Encoder launched, stream is being converted.
    Active,
    /// Encoder terminated by an explicit stop.
    Stopped,
    /// Encoder launch failed.
    Error,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Active => write!(f, "active"),
            JobStatus::Stopped => write!(f, "stopped"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// Output quality tier, selecting the encoder's scale and bitrate parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamQuality {
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
}

impl std::fmt::Display for StreamQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamQuality::P1080 => write!(f, "1080p"),
            StreamQuality::P720 => write!(f, "720p"),
            StreamQuality::P480 => write!(f, "480p"),
        }
    }
}

impl FromStr for StreamQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1080p" => Ok(StreamQuality::P1080),
            "720p" => Ok(StreamQuality::P720),
            "480p" => Ok(StreamQuality::P480),
            other => Err(format!(
                "unknown quality '{}', expected one of 1080p, 720p, 480p",
                other
            )),
        }
    }
}

/// One tracked conversion attempt, from start request to deletion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Unique job identifier (UUID).
    pub id: String,
    /// Display label.
    pub name: String,
    /// RTMP push URL being transcoded. Immutable after creation.
    pub source_url: String,
    /// Selected quality tier. Immutable after creation.
    pub quality: StreamQuality,
    /// Current status of the job.
    pub status: JobStatus,
    /// True iff status is `active`. Maintained by the lifecycle manager only.
    pub is_active: bool,
    /// HLS manifest path, assigned once at successful launch.
    pub output_hls_path: Option<PathBuf>,
    /// DASH manifest path, assigned once at successful launch.
    pub output_dash_path: Option<PathBuf>,
    /// Observed stream duration, frozen once stopped.
    pub duration_seconds: u64,
    /// Observed on-disk footprint, frozen once stopped.
    pub file_size_bytes: u64,
    /// Unix timestamp (milliseconds) of record creation. Anchors retention.
    pub created_at: i64,
    /// Unix timestamp (milliseconds) when the encoder was launched.
    pub started_at: Option<i64>,
    /// Unix timestamp (milliseconds) when the job was stopped.
    pub stopped_at: Option<i64>,
}

impl Job {
    /// Create a new pending job. A missing name gets a placeholder derived
    /// from the generated id.
    pub fn new(name: Option<String>, source_url: String, quality: StreamQuality) -> Self {
        let id = Uuid::new_v4().to_string();
        let name = match name {
            Some(n) if !n.trim().is_empty() => n,
            _ => format!("stream-{}", &id[..8]),
        };

        Self {
            id,
            name,
            source_url,
            quality,
            status: JobStatus::Pending,
            is_active: false,
            output_hls_path: None,
            output_dash_path: None,
            duration_seconds: 0,
            file_size_bytes: 0,
            created_at: now_ms(),
            started_at: None,
            stopped_at: None,
        }
    }

    /// Transition to `active` with output paths assigned.
    pub fn mark_active(&mut self, hls_path: PathBuf, dash_path: PathBuf, at_ms: i64) {
        self.status = JobStatus::Active;
        self.is_active = true;
        self.output_hls_path = Some(hls_path);
        self.output_dash_path = Some(dash_path);
        self.started_at = Some(at_ms);
    }

    /// Transition to `stopped`, freezing the usage counters.
    pub fn mark_stopped(&mut self, at_ms: i64) {
        self.status = JobStatus::Stopped;
        self.is_active = false;
        self.stopped_at = Some(at_ms);
    }

    /// Transition to `error` after a failed launch. Output paths stay unset.
    pub fn mark_error(&mut self) {
        self.status = JobStatus::Error;
        self.is_active = false;
    }

    /// Check if the job is in a terminal state for manual transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Stopped | JobStatus::Error)
    }

    /// Check if the job is older than the given cutoff.
    pub fn is_expired(&self, cutoff_ms: i64) -> bool {
        self.created_at < cutoff_ms
    }
}

/// Get current timestamp in milliseconds since Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Durable record of every job, backed by one JSON file per job.
///
/// All mutating operations write through to disk; the in-memory index is
/// rebuilt from the state directory at startup. The internal lock is never
/// held across file IO.
pub struct JobStore {
    state_dir: PathBuf,
    jobs: RwLock<HashMap<String, Job>>,
}

impl JobStore {
    /// Open the store, creating the state directory if needed and loading
    /// any persisted jobs. Files that fail to parse are skipped with a
    /// warning so one corrupt record cannot take the store down.
    pub fn open<P: AsRef<Path>>(state_dir: P) -> Result<Self, StoreError> {
        let state_dir = state_dir.as_ref().to_path_buf();
        fs::create_dir_all(&state_dir)?;

        let mut jobs = HashMap::new();
        for entry in fs::read_dir(&state_dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            match load_job_from_file(&path) {
                Ok(job) => {
                    jobs.insert(job.id.clone(), job);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable job file");
                }
            }
        }

        Ok(Self {
            state_dir,
            jobs: RwLock::new(jobs),
        })
    }

    fn job_file(&self, id: &str) -> PathBuf {
        self.state_dir.join(format!("{}.json", id))
    }

    fn persist(&self, job: &Job) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(job)?;
        fs::write(self.job_file(&job.id), json)?;
        Ok(())
    }

    /// Insert a new job record.
    pub fn insert(&self, job: Job) -> Result<(), StoreError> {
        self.jobs.write().unwrap().insert(job.id.clone(), job.clone());
        self.persist(&job)
    }

    /// Look up a single job by id.
    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().unwrap().get(id).cloned()
    }

    /// All jobs, newest first.
    pub fn all(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().unwrap().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        jobs
    }

    /// Jobs currently marked active.
    pub fn active(&self) -> Vec<Job> {
        self.all().into_iter().filter(|j| j.is_active).collect()
    }

    /// The most recent jobs, newest first, bounded by `limit`.
    pub fn recent(&self, limit: usize) -> Vec<Job> {
        let mut jobs = self.all();
        jobs.truncate(limit);
        jobs
    }

    /// Number of records in the store.
    pub fn count(&self) -> usize {
        self.jobs.read().unwrap().len()
    }

    /// Apply a mutation to the job with the given id and persist the result.
    /// Returns the updated job, or `None` if the id is unknown.
    pub fn update<F>(&self, id: &str, f: F) -> Result<Option<Job>, StoreError>
    where
        F: FnOnce(&mut Job),
    {
        let updated = {
            let mut jobs = self.jobs.write().unwrap();
            match jobs.get_mut(id) {
                Some(job) => {
                    f(job);
                    Some(job.clone())
                }
                None => None,
            }
        };

        if let Some(ref job) = updated {
            self.persist(job)?;
        }
        Ok(updated)
    }

    /// Remove a job record and its backing file. Returns whether a record
    /// existed.
    pub fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let existed = self.jobs.write().unwrap().remove(id).is_some();
        match fs::remove_file(self.job_file(id)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(existed)
    }

    /// Jobs created before the cutoff, eligible for retention deletion.
    pub fn expired(&self, cutoff_ms: i64) -> Vec<Job> {
        self.all()
            .into_iter()
            .filter(|j| j.is_expired(cutoff_ms))
            .collect()
    }

    /// Batch-delete every record created before the cutoff. Returns the
    /// number of records removed.
    pub fn remove_expired(&self, cutoff_ms: i64) -> Result<usize, StoreError> {
        let ids: Vec<String> = {
            let jobs = self.jobs.read().unwrap();
            jobs.values()
                .filter(|j| j.is_expired(cutoff_ms))
                .map(|j| j.id.clone())
                .collect()
        };

        {
            let mut jobs = self.jobs.write().unwrap();
            for id in &ids {
                jobs.remove(id);
            }
        }

        for id in &ids {
            match fs::remove_file(self.job_file(id)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(job_id = %id, error = %e, "failed to remove job file"),
            }
        }

        Ok(ids.len())
    }
}

/// Loads a single job from a JSON file.
fn load_job_from_file(path: &Path) -> Result<Job, StoreError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_job(name: &str) -> Job {
        Job::new(
            Some(name.to_string()),
            "rtmp://ingest.example.com/live/key".to_string(),
            StreamQuality::P720,
        )
    }

    #[test]
    fn test_new_job_defaults() {
        let job = make_job("concert");

        assert_eq!(job.id.len(), 36);
        assert_eq!(job.name, "concert");
        assert_eq!(job.status, JobStatus::Pending);
        assert!(!job.is_active);
        assert!(job.output_hls_path.is_none());
        assert!(job.output_dash_path.is_none());
        assert_eq!(job.duration_seconds, 0);
        assert_eq!(job.file_size_bytes, 0);
        assert!(job.created_at > 0);
        assert!(job.started_at.is_none());
        assert!(job.stopped_at.is_none());
    }

    #[test]
    fn test_missing_name_gets_placeholder() {
        let job = Job::new(None, "rtmp://in/live".to_string(), StreamQuality::P480);
        assert!(job.name.starts_with("stream-"));
        assert_eq!(job.name.len(), "stream-".len() + 8);

        let blank = Job::new(Some("  ".to_string()), "rtmp://in/live".to_string(), StreamQuality::P480);
        assert!(blank.name.starts_with("stream-"));
    }

    #[test]
    fn test_status_transitions() {
        let mut job = make_job("t");

        job.mark_active(PathBuf::from("hls/x.m3u8"), PathBuf::from("dash/x.mpd"), 1000);
        assert_eq!(job.status, JobStatus::Active);
        assert!(job.is_active);
        assert_eq!(job.started_at, Some(1000));
        assert!(!job.is_terminal());

        job.mark_stopped(2000);
        assert_eq!(job.status, JobStatus::Stopped);
        assert!(!job.is_active);
        assert_eq!(job.stopped_at, Some(2000));
        assert!(job.is_terminal());
    }

    #[test]
    fn test_mark_error_leaves_paths_unset() {
        let mut job = make_job("t");
        job.mark_error();

        assert_eq!(job.status, JobStatus::Error);
        assert!(!job.is_active);
        assert!(job.output_hls_path.is_none());
        assert!(job.output_dash_path.is_none());
        assert!(job.is_terminal());
    }

    #[test]
    fn test_quality_from_str() {
        assert_eq!("1080p".parse::<StreamQuality>().unwrap(), StreamQuality::P1080);
        assert_eq!("720p".parse::<StreamQuality>().unwrap(), StreamQuality::P720);
        assert_eq!("480p".parse::<StreamQuality>().unwrap(), StreamQuality::P480);
        assert!("4k".parse::<StreamQuality>().is_err());
        assert!("".parse::<StreamQuality>().is_err());
    }

    #[test]
    fn test_quality_serde_uses_wire_names() {
        let json = serde_json::to_string(&StreamQuality::P1080).unwrap();
        assert_eq!(json, "\"1080p\"");
        let back: StreamQuality = serde_json::from_str("\"480p\"").unwrap();
        assert_eq!(back, StreamQuality::P480);
    }

    #[test]
    fn test_insert_get_and_reload() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();

        let job = make_job("persisted");
        let id = job.id.clone();
        store.insert(job.clone()).unwrap();

        assert_eq!(store.get(&id), Some(job.clone()));
        assert!(dir.path().join(format!("{}.json", id)).exists());

        // A fresh store over the same directory sees the record
        let reopened = JobStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(&id), Some(job));
    }

    #[test]
    fn test_open_skips_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();
        store.insert(make_job("good")).unwrap();

        fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let reopened = JobStore::open(dir.path()).unwrap();
        assert_eq!(reopened.count(), 1);
    }

    #[test]
    fn test_all_is_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();

        let mut older = make_job("older");
        older.created_at = 1_000;
        let mut newer = make_job("newer");
        newer.created_at = 2_000;

        store.insert(older).unwrap();
        store.insert(newer).unwrap();

        let all = store.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "newer");
        assert_eq!(all[1].name, "older");
    }

    #[test]
    fn test_recent_is_bounded() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();

        for i in 0..5 {
            let mut job = make_job(&format!("job-{}", i));
            job.created_at = i;
            store.insert(job).unwrap();
        }

        let recent = store.recent(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].name, "job-4");
        assert_eq!(recent[2].name, "job-2");
    }

    #[test]
    fn test_active_filter() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();

        let mut live = make_job("live");
        live.mark_active(PathBuf::from("a.m3u8"), PathBuf::from("a.mpd"), now_ms());
        let idle = make_job("idle");

        store.insert(live).unwrap();
        store.insert(idle).unwrap();

        let active = store.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "live");
    }

    #[test]
    fn test_update_persists() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();

        let job = make_job("updating");
        let id = job.id.clone();
        store.insert(job).unwrap();

        let updated = store
            .update(&id, |j| j.mark_stopped(5_000))
            .unwrap()
            .expect("job exists");
        assert_eq!(updated.status, JobStatus::Stopped);

        let reopened = JobStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(&id).unwrap().status, JobStatus::Stopped);

        // Unknown id is not an error
        assert!(store.update("no-such-id", |j| j.mark_error()).unwrap().is_none());
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();

        let job = make_job("doomed");
        let id = job.id.clone();
        store.insert(job).unwrap();

        assert!(store.remove(&id).unwrap());
        assert!(store.get(&id).is_none());
        assert!(!dir.path().join(format!("{}.json", id)).exists());

        // Second removal reports nothing found, without erroring
        assert!(!store.remove(&id).unwrap());
    }

    #[test]
    fn test_expiry_boundary() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();

        let now = now_ms();
        let day_ms = 24 * 60 * 60 * 1000;

        let mut eight_days = make_job("eight-days-old");
        eight_days.created_at = now - 8 * day_ms;
        let mut six_days = make_job("six-days-old");
        six_days.created_at = now - 6 * day_ms;

        let old_id = eight_days.id.clone();
        store.insert(eight_days).unwrap();
        store.insert(six_days).unwrap();

        let cutoff = now - 7 * day_ms;
        let expired = store.expired(cutoff);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, old_id);

        let removed = store.remove_expired(cutoff).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count(), 1);
        assert!(store.get(&old_id).is_none());
        assert!(!dir.path().join(format!("{}.json", old_id)).exists());

        // No candidates left, second batch delete is a no-op
        assert_eq!(store.remove_expired(cutoff).unwrap(), 0);
    }
}
