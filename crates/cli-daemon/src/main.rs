//! CLI entry point for the rtmp-cast daemon.
//!
//! Parses command line arguments, installs the log subscriber, and starts
//! the daemon.

use clap::Parser;
use rtmp_cast::{Config, Daemon, DaemonError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// rtmp-cast - converts RTMP push streams into HTTP-served HLS/DASH output
#[derive(Parser, Debug)]
#[command(name = "rtmp-cast")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Skip startup checks (ffmpeg availability). For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!(config = %args.config.display(), "rtmp-cast starting");

    let daemon_result = if args.skip_checks {
        warn!("skipping startup checks (--skip-checks enabled)");
        Config::load(&args.config)
            .map_err(DaemonError::from)
            .and_then(Daemon::new_without_checks)
    } else {
        Daemon::new(&args.config)
    };

    match daemon_result {
        Ok(daemon) => {
            info!(
                addr = %daemon.config.server.bind_addr,
                output_dir = %daemon.config.storage.output_dir.display(),
                retention_days = daemon.config.retention.window_days,
                "daemon initialized"
            );

            if let Err(e) = daemon.run_with_server().await {
                error!(error = %e, "daemon error");
                return ExitCode::FAILURE;
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "failed to initialize daemon");
            ExitCode::FAILURE
        }
    }
}
