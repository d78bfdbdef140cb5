//! rtmp-cast daemon
//!
//! Converts RTMP push streams into HTTP-served HLS/DASH output by running
//! one ffmpeg process per conversion job, tracking every job in a persistent
//! store, and reclaiming storage through a scheduled retention sweep.

pub mod api;
pub mod daemon;
pub mod lifecycle;
pub mod startup;
pub mod stats;
pub mod store;
pub mod supervisor;
pub mod sweeper;

pub use rtmp_cast_config as config;
pub use rtmp_cast_config::Config;

pub use api::{create_router, ApiError, ApiState};
pub use daemon::{shutdown_signal, Daemon, DaemonError};
pub use lifecycle::{CreateJobRequest, JobLocks, LifecycleError, LifecycleManager};
pub use startup::{check_ffmpeg_available, run_startup_checks, StartupError};
pub use stats::{collect_system_metrics, compute_stats, ServerStats, SystemMetrics};
pub use store::{now_ms, Job, JobStatus, JobStore, StoreError, StreamQuality};
pub use supervisor::{
    build_ffmpeg_command, cleanup_stream_files, output_paths, quality_params, stream_disk_usage,
    CleanupOutcome, EncoderSettings, LaunchError, ProcessSupervisor, QualityParams, StreamOutputs,
};
pub use sweeper::{RetentionSweeper, SweepSummary};
