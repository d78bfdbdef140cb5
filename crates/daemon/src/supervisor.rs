//! Process supervisor module: owns the set of live encoder processes.
//!
//! One ffmpeg process per job id, registered in an internal mapping that no
//! other component touches. Launch is fire-and-forget; exits (requested or
//! not) are reaped asynchronously by per-process monitor tasks.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::store::StreamQuality;

/// Error type for encoder launch failures
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Output directories could not be created
    #[error("Failed to create output directories: {0}")]
    CreateDirs(std::io::Error),

    /// The encoder process could not be spawned
    #[error("Failed to spawn encoder: {0}")]
    Spawn(std::io::Error),
}

/// Scale and rate-control parameters for one quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityParams {
    pub width: u32,
    pub height: u32,
    pub video_bitrate_kbps: u32,
    pub max_bitrate_kbps: u32,
    pub buffer_size_kbps: u32,
}

/// Fixed quality-to-parameter table for the three supported tiers.
pub fn quality_params(quality: StreamQuality) -> QualityParams {
    match quality {
        StreamQuality::P1080 => QualityParams {
            width: 1920,
            height: 1080,
            video_bitrate_kbps: 4000,
            max_bitrate_kbps: 4000,
            buffer_size_kbps: 8000,
        },
        StreamQuality::P720 => QualityParams {
            width: 1280,
            height: 720,
            video_bitrate_kbps: 2500,
            max_bitrate_kbps: 2500,
            buffer_size_kbps: 5000,
        },
        StreamQuality::P480 => QualityParams {
            width: 854,
            height: 480,
            video_bitrate_kbps: 1000,
            max_bitrate_kbps: 1000,
            buffer_size_kbps: 2000,
        },
    }
}

/// Encoder invocation settings, taken from the daemon configuration.
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    /// Path to the ffmpeg binary
    pub ffmpeg_path: PathBuf,
    /// Target segment length in seconds
    pub segment_seconds: u32,
    /// Number of segments kept in the live playlist window
    pub playlist_size: u32,
}

impl From<&rtmp_cast_config::EncoderConfig> for EncoderSettings {
    fn from(cfg: &rtmp_cast_config::EncoderConfig) -> Self {
        Self {
            ffmpeg_path: cfg.ffmpeg_path.clone(),
            segment_seconds: cfg.segment_seconds,
            playlist_size: cfg.playlist_size,
        }
    }
}

/// Manifest locations assigned to a job at launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutputs {
    pub hls_path: PathBuf,
    pub dash_path: PathBuf,
}

/// Manifest paths for a job id: `<output>/hls/{id}.m3u8` and
/// `<output>/dash/{id}.mpd`. Deterministic, so no two jobs can collide.
pub fn output_paths(output_dir: &Path, job_id: &str) -> StreamOutputs {
    StreamOutputs {
        hls_path: output_dir.join("hls").join(format!("{}.m3u8", job_id)),
        dash_path: output_dir.join("dash").join(format!("{}.mpd", job_id)),
    }
}

/// Build the ffmpeg invocation for one job.
///
/// H.264 + AAC with zero-latency tuning, scaled and rate-limited per the
/// quality tier, writing a windowed HLS playlist that deletes segments as
/// they fall out of the window, so disk usage for an active job stays
/// bounded regardless of run length.
pub fn build_ffmpeg_command(
    settings: &EncoderSettings,
    source_url: &str,
    quality: StreamQuality,
    hls_path: &Path,
) -> std::process::Command {
    let params = quality_params(quality);
    let mut cmd = std::process::Command::new(&settings.ffmpeg_path);

    cmd.arg("-i").arg(source_url);
    cmd.arg("-c:v").arg("libx264");
    cmd.arg("-c:a").arg("aac");
    cmd.arg("-preset").arg("fast");
    cmd.arg("-tune").arg("zerolatency");
    cmd.arg("-profile:v").arg("baseline");
    cmd.arg("-level").arg("3.0");
    cmd.arg("-pix_fmt").arg("yuv420p");

    cmd.arg("-vf")
        .arg(format!("scale={}:{}", params.width, params.height));
    cmd.arg("-b:v").arg(format!("{}k", params.video_bitrate_kbps));
    cmd.arg("-maxrate").arg(format!("{}k", params.max_bitrate_kbps));
    cmd.arg("-bufsize").arg(format!("{}k", params.buffer_size_kbps));

    cmd.arg("-f").arg("hls");
    cmd.arg("-hls_time").arg(settings.segment_seconds.to_string());
    cmd.arg("-hls_list_size").arg(settings.playlist_size.to_string());
    cmd.arg("-hls_flags").arg("delete_segments");
    cmd.arg("-hls_allow_cache").arg("0");
    cmd.arg(hls_path);

    cmd
}

/// Handle to one registered encoder process. Dropping it (or sending on the
/// stop channel) makes the monitor task kill and reap the child.
struct ProcessHandle {
    stop: oneshot::Sender<()>,
}

type ProcessMap = Arc<Mutex<HashMap<String, ProcessHandle>>>;

/// Owns the job-id to encoder-process mapping.
///
/// The mapping is mutated only here, under an internal lock that is never
/// held across an await point. Every spawned process gets a monitor task
/// that removes its entry when it exits, whether the exit was requested
/// through [`ProcessSupervisor::terminate`] or not.
pub struct ProcessSupervisor {
    settings: EncoderSettings,
    processes: ProcessMap,
}

impl ProcessSupervisor {
    pub fn new(settings: EncoderSettings) -> Self {
        Self {
            settings,
            processes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Launch an encoder for the given job and register it.
    ///
    /// Ensures the output directories exist, spawns ffmpeg and returns the
    /// assigned manifest paths immediately; readiness of the output is
    /// observed by consumers polling for the manifest file, not here.
    pub fn launch(
        &self,
        job_id: &str,
        source_url: &str,
        quality: StreamQuality,
        output_dir: &Path,
    ) -> Result<StreamOutputs, LaunchError> {
        fs::create_dir_all(output_dir.join("hls")).map_err(LaunchError::CreateDirs)?;
        fs::create_dir_all(output_dir.join("dash")).map_err(LaunchError::CreateDirs)?;

        let outputs = output_paths(output_dir, job_id);

        let std_cmd = build_ffmpeg_command(&self.settings, source_url, quality, &outputs.hls_path);
        let mut cmd = tokio::process::Command::from(std_cmd);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(LaunchError::Spawn)?;

        if let Some(stderr) = child.stderr.take() {
            let id = job_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(job_id = %id, "ffmpeg: {}", line);
                }
            });
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        self.processes
            .lock()
            .unwrap()
            .insert(job_id.to_string(), ProcessHandle { stop: stop_tx });

        tokio::spawn(monitor_process(
            self.processes.clone(),
            job_id.to_string(),
            child,
            stop_rx,
        ));

        Ok(outputs)
    }

    /// Signal the process registered under `job_id` and drop it from the
    /// mapping. Returns whether a process was found; `false` is a benign
    /// outcome, so calling this twice (or after a crash) is safe.
    pub fn terminate(&self, job_id: &str) -> bool {
        let handle = self.processes.lock().unwrap().remove(job_id);
        match handle {
            Some(handle) => {
                // The monitor task also reacts to the sender being dropped,
                // so a send failure here still tears the process down.
                let _ = handle.stop.send(());
                true
            }
            None => false,
        }
    }

    /// Membership check against the live mapping.
    pub fn is_live(&self, job_id: &str) -> bool {
        self.processes.lock().unwrap().contains_key(job_id)
    }

    /// Number of live encoder processes.
    pub fn live_count(&self) -> usize {
        self.processes.lock().unwrap().len()
    }
}

/// Waits for the child to exit or for a termination request, then removes
/// the job's entry from the mapping.
async fn monitor_process(
    processes: ProcessMap,
    job_id: String,
    mut child: Child,
    stop_rx: oneshot::Receiver<()>,
) {
    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => debug!(job_id = %job_id, %status, "encoder exited"),
                Err(e) => warn!(job_id = %job_id, error = %e, "failed to reap encoder"),
            }
        }
        _ = stop_rx => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            debug!(job_id = %job_id, "encoder terminated on request");
        }
    }
    processes.lock().unwrap().remove(&job_id);
}

/// Result of a best-effort file cleanup pass.
///
/// A nonzero `failed` count is a partial teardown: the files left behind are
/// orphans on disk, an accepted and logged degradation that never blocks
/// record deletion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupOutcome {
    /// Files removed
    pub removed: usize,
    /// Files that matched but could not be removed
    pub failed: usize,
}

/// Delete every file under the `hls/` and `dash/` subdirectories whose name
/// is prefixed by the job id, leaving other jobs' files untouched. Per-file
/// failures are logged and skipped.
pub fn cleanup_stream_files(output_dir: &Path, job_id: &str) -> CleanupOutcome {
    let mut outcome = CleanupOutcome::default();
    for format_dir in ["hls", "dash"] {
        let dir = output_dir.join(format_dir);
        if !dir.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&dir)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let matches = entry
                .file_name()
                .to_str()
                .map(|name| name.starts_with(job_id))
                .unwrap_or(false);
            if !matches {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => outcome.removed += 1,
                Err(e) => {
                    outcome.failed += 1;
                    warn!(path = %entry.path().display(), error = %e, "failed to remove stream file");
                }
            }
        }
    }
    outcome
}

/// Total size in bytes of the on-disk files belonging to a job, by the same
/// id-prefix rule as [`cleanup_stream_files`].
pub fn stream_disk_usage(output_dir: &Path, job_id: &str) -> u64 {
    let mut total = 0;
    for format_dir in ["hls", "dash"] {
        let dir = output_dir.join(format_dir);
        if !dir.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&dir)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let matches = entry
                .file_name()
                .to_str()
                .map(|name| name.starts_with(job_id))
                .unwrap_or(false);
            if matches {
                total += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
    }
    total
}
