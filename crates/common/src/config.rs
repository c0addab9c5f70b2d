//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory under which session directories are allocated.
    pub recordings_dir: PathBuf,

    /// Input capture and lifecycle tuning.
    pub capture: CaptureSettings,

    /// Video recording backend settings.
    pub video: VideoSettings,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Input capture parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// How long the log writer waits on the queue before re-checking.
    pub queue_poll_interval_ms: u64,

    /// Sleep between listener polls when a source has nothing pending.
    pub listener_idle_ms: u64,

    /// Restart attempts per listener before the session is aborted.
    pub listener_restart_limit: u32,

    /// Pointer coordinates are clamped to this desktop size.
    pub screen_width: u32,
    pub screen_height: u32,

    /// Whether the host uses "natural" scrolling. Stored in session
    /// metadata; scroll deltas are always logged as the device reports them.
    pub natural_scrolling: bool,
}

/// Which video backend drives screen capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Screen capture through an `ffmpeg` subprocess.
    #[default]
    Ffmpeg,
    /// Input events only, no video.
    None,
}

/// Video recording backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    pub backend: BackendKind,

    /// Path or name of the ffmpeg executable.
    pub ffmpeg_path: PathBuf,

    /// Capture frame rate.
    pub fps: u32,

    /// Capture input passed to ffmpeg (e.g. ":0.0" for x11grab). Empty selects
    /// the platform default.
    pub display: String,

    /// Video file name inside the session directory.
    pub output_file: String,

    /// Grace period for ffmpeg to finalize the file before it is killed.
    pub stop_timeout_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "ducktrack=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            recordings_dir: default_recordings_dir(),
            capture: CaptureSettings::default(),
            video: VideoSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            queue_poll_interval_ms: 50,
            listener_idle_ms: 5,
            listener_restart_limit: 1,
            screen_width: 1920,
            screen_height: 1080,
            natural_scrolling: false,
        }
    }
}

impl CaptureSettings {
    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms.max(1))
    }

    pub fn listener_idle(&self) -> Duration {
        Duration::from_millis(self.listener_idle_ms.max(1))
    }
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Ffmpeg,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            fps: 30,
            display: String::new(),
            output_file: "screen.mp4".to_string(),
            stop_timeout_ms: 5000,
        }
    }
}

impl VideoSettings {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_file_path())
    }

    /// Load config from `path`, falling back to defaults when it is missing
    /// or unreadable.
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("ducktrack").join("config.json")
}

/// Default recordings directory.
fn default_recordings_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("ducktrack").join("recordings")
}
