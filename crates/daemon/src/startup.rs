//! Preflight checks run before the daemon starts serving.

use rtmp_cast_config::Config;
use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("ffmpeg not available: {0}")]
    FfmpegUnavailable(String),
}

/// Check that the configured ffmpeg binary works by running `ffmpeg -version`.
pub fn check_ffmpeg_available(ffmpeg_path: &Path) -> Result<(), StartupError> {
    let output = Command::new(ffmpeg_path)
        .arg("-version")
        .output()
        .map_err(|e| {
            StartupError::FfmpegUnavailable(format!(
                "{} -version failed; is ffmpeg installed and in PATH? Error: {}",
                ffmpeg_path.display(),
                e
            ))
        })?;

    if !output.status.success() {
        return Err(StartupError::FfmpegUnavailable(format!(
            "{} -version exited with {}",
            ffmpeg_path.display(),
            output.status
        )));
    }

    Ok(())
}

/// Run all preflight checks for the given configuration.
pub fn run_startup_checks(config: &Config) -> Result<(), StartupError> {
    check_ffmpeg_available(&config.encoder.ffmpeg_path)
}
