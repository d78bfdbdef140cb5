//! Usage statistics derived from the job store, plus a system snapshot.

use serde::{Deserialize, Serialize};

use crate::store::JobStore;

/// Crude per-stream capacity figure used for the bandwidth estimate.
///
/// The estimate is a linear placeholder signal derived from the active job
/// count, not a measured throughput.
pub const BANDWIDTH_MBPS_PER_ACTIVE_JOB: u64 = 5;

/// System-level metrics for resource monitoring
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub mem_usage_percent: f32,
    pub load_avg_1: f32,
    pub load_avg_5: f32,
    pub load_avg_15: f32,
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self {
            cpu_usage_percent: 0.0,
            mem_usage_percent: 0.0,
            load_avg_1: 0.0,
            load_avg_5: 0.0,
            load_avg_15: 0.0,
        }
    }
}

/// Aggregate usage summary served by the stats endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerStats {
    /// Count of all job records
    pub total_jobs: usize,
    /// Count of records marked active
    pub active_jobs: usize,
    /// Sum of observed on-disk footprints across all records
    pub storage_used_bytes: u64,
    /// Placeholder capacity estimate, linear in the active job count
    pub bandwidth_estimate_mbps: u64,
    /// Host resource snapshot
    pub system: SystemMetrics,
}

/// Collects current system metrics using sysinfo
pub fn collect_system_metrics() -> SystemMetrics {
    use sysinfo::System;

    let mut sys = System::new();
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let cpu_usage = sys.global_cpu_usage();
    let total_memory = sys.total_memory();
    let used_memory = sys.used_memory();
    let mem_usage = if total_memory > 0 {
        (used_memory as f64 / total_memory as f64 * 100.0) as f32
    } else {
        0.0
    };

    let load_avg = System::load_average();

    SystemMetrics {
        cpu_usage_percent: cpu_usage,
        mem_usage_percent: mem_usage,
        load_avg_1: load_avg.one as f32,
        load_avg_5: load_avg.five as f32,
        load_avg_15: load_avg.fifteen as f32,
    }
}

/// Compute the aggregate stats from the current store contents.
///
/// Read-only; safe to call concurrently with any mutating operation.
pub fn compute_stats(store: &JobStore) -> ServerStats {
    let jobs = store.all();
    let active_jobs = jobs.iter().filter(|j| j.is_active).count();
    let storage_used_bytes = jobs.iter().map(|j| j.file_size_bytes).sum();

    ServerStats {
        total_jobs: jobs.len(),
        active_jobs,
        storage_used_bytes,
        bandwidth_estimate_mbps: active_jobs as u64 * BANDWIDTH_MBPS_PER_ACTIVE_JOB,
        system: collect_system_metrics(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{now_ms, Job, StreamQuality};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn job_with_size(name: &str, size: u64, active: bool) -> Job {
        let mut job = Job::new(
            Some(name.to_string()),
            "rtmp://ingest.example.com/live/key".to_string(),
            StreamQuality::P720,
        );
        job.file_size_bytes = size;
        if active {
            job.mark_active(
                PathBuf::from("hls/x.m3u8"),
                PathBuf::from("dash/x.mpd"),
                now_ms(),
            );
        }
        job
    }

    #[test]
    fn test_stats_on_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();

        let stats = compute_stats(&store);

        assert_eq!(stats.total_jobs, 0);
        assert_eq!(stats.active_jobs, 0);
        assert_eq!(stats.storage_used_bytes, 0);
        assert_eq!(stats.bandwidth_estimate_mbps, 0);
    }

    #[test]
    fn test_stats_counts_and_sums() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();

        store.insert(job_with_size("a", 1_000, true)).unwrap();
        store.insert(job_with_size("b", 2_500, true)).unwrap();
        store.insert(job_with_size("c", 4_000, false)).unwrap();

        let stats = compute_stats(&store);

        assert_eq!(stats.total_jobs, 3);
        assert_eq!(stats.active_jobs, 2);
        assert_eq!(stats.storage_used_bytes, 7_500);
        assert_eq!(stats.bandwidth_estimate_mbps, 2 * BANDWIDTH_MBPS_PER_ACTIVE_JOB);
    }

    #[test]
    fn test_stats_json_shape() {
        let stats = ServerStats {
            total_jobs: 4,
            active_jobs: 1,
            storage_used_bytes: 123,
            bandwidth_estimate_mbps: 5,
            system: SystemMetrics::default(),
        };

        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("total_jobs"));
        assert!(json.contains("active_jobs"));
        assert!(json.contains("storage_used_bytes"));
        assert!(json.contains("bandwidth_estimate_mbps"));
        assert!(json.contains("cpu_usage_percent"));
        assert!(json.contains("load_avg_15"));
    }

    #[test]
    fn test_collect_system_metrics_in_range() {
        let metrics = collect_system_metrics();
        assert!(metrics.mem_usage_percent >= 0.0);
        assert!(metrics.mem_usage_percent <= 100.0);
    }
}
