//! Daemon startup and composition root.
//!
//! Wires the job store, process supervisor, lifecycle manager, and retention
//! sweeper together, spawns the background tasks, and serves the HTTP API
//! until a shutdown signal arrives.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use rtmp_cast_config::{Config, ConfigError};

use crate::api::{create_router, ApiState};
use crate::lifecycle::{JobLocks, LifecycleManager};
use crate::startup::{run_startup_checks, StartupError};
use crate::store::{JobStore, StoreError};
use crate::supervisor::{EncoderSettings, ProcessSupervisor};
use crate::sweeper::RetentionSweeper;

/// How often the usage counters of active jobs are refreshed.
const USAGE_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Job store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Server error
    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    store: Arc<JobStore>,
    lifecycle: Arc<LifecycleManager>,
    sweeper: Arc<RetentionSweeper>,
}

impl Daemon {
    /// Initialize the daemon from a config file: load the configuration,
    /// run the startup checks, open the store, and wire the components.
    pub fn new<P: AsRef<Path>>(config_path: P) -> Result<Self, DaemonError> {
        let config = Config::load(config_path)?;
        run_startup_checks(&config)?;
        Self::build(config)
    }

    /// Initialize the daemon with an existing configuration.
    pub fn with_config(config: Config) -> Result<Self, DaemonError> {
        run_startup_checks(&config)?;
        Self::build(config)
    }

    /// Initialize the daemon without running startup checks.
    ///
    /// Useful for testing when ffmpeg is not available.
    pub fn new_without_checks(config: Config) -> Result<Self, DaemonError> {
        Self::build(config)
    }

    fn build(config: Config) -> Result<Self, DaemonError> {
        let store = Arc::new(JobStore::open(&config.storage.state_dir)?);
        let supervisor = Arc::new(ProcessSupervisor::new(EncoderSettings::from(&config.encoder)));
        let locks = Arc::new(JobLocks::new());
        let output_dir = config.storage.output_dir.clone();

        let lifecycle = Arc::new(LifecycleManager::new(
            store.clone(),
            supervisor.clone(),
            locks.clone(),
            output_dir.clone(),
        ));
        let sweeper = Arc::new(RetentionSweeper::new(
            store.clone(),
            supervisor,
            locks,
            output_dir,
            config.retention.window_days,
        ));

        Ok(Self {
            config,
            store,
            lifecycle,
            sweeper,
        })
    }

    /// The shared job store.
    pub fn store(&self) -> Arc<JobStore> {
        self.store.clone()
    }

    /// The lifecycle manager.
    pub fn lifecycle(&self) -> Arc<LifecycleManager> {
        self.lifecycle.clone()
    }

    /// The retention sweeper, also reachable through `POST /api/cleanup`.
    pub fn sweeper(&self) -> Arc<RetentionSweeper> {
        self.sweeper.clone()
    }

    /// Spawn the scheduled retention sweep loop.
    pub fn start_sweep_scheduler(&self) -> JoinHandle<()> {
        let interval = Duration::from_secs(self.config.retention.sweep_interval_hours * 3600);
        self.sweeper.start_scheduler(interval)
    }

    /// Spawn the periodic refresh of active jobs' usage counters.
    pub fn start_usage_refresher(&self) -> JoinHandle<()> {
        let lifecycle = self.lifecycle.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(USAGE_REFRESH_INTERVAL);
            loop {
                ticker.tick().await;
                lifecycle.refresh_usage();
            }
        })
    }

    /// Build the HTTP router over this daemon's components.
    pub fn router(&self) -> axum::Router {
        let state = ApiState {
            store: self.store.clone(),
            lifecycle: self.lifecycle.clone(),
            sweeper: self.sweeper.clone(),
        };
        create_router(state, &self.config.storage.output_dir)
    }

    /// Serve the HTTP API until a shutdown signal is received.
    pub async fn serve(&self) -> Result<(), DaemonError> {
        let listener = tokio::net::TcpListener::bind(self.config.server.bind_addr.as_str()).await?;
        info!(addr = %self.config.server.bind_addr, "API server listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }

    /// Run the daemon with all background tasks: the sweep scheduler, the
    /// usage refresher, and the API server.
    pub async fn run_with_server(&self) -> Result<(), DaemonError> {
        let _sweep_handle = self.start_sweep_scheduler();
        let _usage_handle = self.start_usage_refresher();
        self.serve().await
    }
}

/// Returns a future that completes when a shutdown signal is received.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        tokio::select! {
            _ = sigint.recv() => info!(signal = "SIGINT", "shutdown signal"),
            _ = sigterm.recv() => info!(signal = "SIGTERM", "shutdown signal"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("shutdown signal");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.storage.output_dir = dir.join("out");
        config.storage.state_dir = dir.join("state");
        config.encoder.ffmpeg_path = PathBuf::from("true");
        config
    }

    #[tokio::test]
    async fn test_daemon_initialization_without_checks() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());

        let daemon = Daemon::new_without_checks(config.clone()).unwrap();

        assert_eq!(daemon.config, config);
        assert_eq!(daemon.store().count(), 0);
        assert!(dir.path().join("state").is_dir());
    }

    #[tokio::test]
    async fn test_daemon_with_config_runs_checks() {
        let dir = TempDir::new().unwrap();

        // "true" passes the preflight check
        assert!(Daemon::with_config(test_config(dir.path())).is_ok());

        let mut broken = test_config(dir.path());
        broken.encoder.ffmpeg_path = PathBuf::from("/nonexistent/ffmpeg");
        assert!(matches!(
            Daemon::with_config(broken),
            Err(DaemonError::Startup(_))
        ));
    }

    #[test]
    fn test_daemon_new_requires_config_file() {
        let result = Daemon::new("/nonexistent/config.toml");
        assert!(matches!(result, Err(DaemonError::Config(_))));
    }

    #[tokio::test]
    async fn test_daemon_router_serves_the_api() {
        let dir = TempDir::new().unwrap();
        let daemon = Daemon::new_without_checks(test_config(dir.path())).unwrap();

        let response = daemon
            .router()
            .oneshot(
                Request::builder()
                    .uri("/api/streams")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_background_tasks_spawn_and_abort() {
        let dir = TempDir::new().unwrap();
        let daemon = Daemon::new_without_checks(test_config(dir.path())).unwrap();

        let sweep = daemon.start_sweep_scheduler();
        let usage = daemon.start_usage_refresher();
        assert!(!sweep.is_finished());
        assert!(!usage.is_finished());
        sweep.abort();
        usage.abort();
    }
}
