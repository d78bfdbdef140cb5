//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Address the API server binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:5000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Storage layout configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Root directory for segmented output (`hls/` and `dash/` subdirectories)
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Directory where job records are persisted as JSON files
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("streams")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("streams/state")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            state_dir: default_state_dir(),
        }
    }
}

/// Encoder invocation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    /// Path to the ffmpeg binary
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    /// Target segment length in seconds
    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: u32,
    /// Number of segments kept in the live playlist window
    #[serde(default = "default_playlist_size")]
    pub playlist_size: u32,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_segment_seconds() -> u32 {
    4
}

fn default_playlist_size() -> u32 {
    5
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            segment_seconds: default_segment_seconds(),
            playlist_size: default_playlist_size(),
        }
    }
}

/// Retention sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetentionConfig {
    /// Age in days after which a job becomes eligible for deletion
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    /// Hours between scheduled sweeps
    #[serde(default = "default_sweep_interval_hours")]
    pub sweep_interval_hours: u64,
}

fn default_window_days() -> u32 {
    7
}

fn default_sweep_interval_hours() -> u64 {
    24
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            sweep_interval_hours: default_sweep_interval_hours(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - SERVER_BIND_ADDR -> server.bind_addr
    /// - STORAGE_OUTPUT_DIR -> storage.output_dir
    /// - STORAGE_STATE_DIR -> storage.state_dir
    /// - ENCODER_FFMPEG_PATH -> encoder.ffmpeg_path
    /// - ENCODER_SEGMENT_SECONDS -> encoder.segment_seconds
    /// - ENCODER_PLAYLIST_SIZE -> encoder.playlist_size
    /// - RETENTION_WINDOW_DAYS -> retention.window_days
    /// - RETENTION_SWEEP_INTERVAL_HOURS -> retention.sweep_interval_hours
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("SERVER_BIND_ADDR") {
            if !val.is_empty() {
                self.server.bind_addr = val;
            }
        }

        if let Ok(val) = env::var("STORAGE_OUTPUT_DIR") {
            if !val.is_empty() {
                self.storage.output_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("STORAGE_STATE_DIR") {
            if !val.is_empty() {
                self.storage.state_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("ENCODER_FFMPEG_PATH") {
            if !val.is_empty() {
                self.encoder.ffmpeg_path = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("ENCODER_SEGMENT_SECONDS") {
            if let Ok(secs) = val.parse::<u32>() {
                self.encoder.segment_seconds = secs;
            }
        }

        if let Ok(val) = env::var("ENCODER_PLAYLIST_SIZE") {
            if let Ok(size) = val.parse::<u32>() {
                self.encoder.playlist_size = size;
            }
        }

        if let Ok(val) = env::var("RETENTION_WINDOW_DAYS") {
            if let Ok(days) = val.parse::<u32>() {
                self.retention.window_days = days;
            }
        }

        if let Ok(val) = env::var("RETENTION_SWEEP_INTERVAL_HOURS") {
            if let Ok(hours) = val.parse::<u64>() {
                self.retention.sweep_interval_hours = hours;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }
}
