use facegate_core::config::ConfigError;
use facegate_core::{FrameSize, PipelineConfig};
use std::path::PathBuf;

/// Session runner configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Scoring, capture and matching thresholds.
    pub pipeline: PipelineConfig,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Frame size requested from the camera.
    pub frame_size: FrameSize,
    /// Refuse to persist a capture that resembles another owner.
    pub reject_duplicates: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            db_path: default_data_dir(|key| std::env::var(key).ok()).join("faces.db"),
            camera_device: "/dev/video0".to_string(),
            frame_size: FrameSize::new(640, 480),
            reject_duplicates: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    ///
    /// `FACEGATE_CONFIG` names a TOML file of pipeline thresholds; a file
    /// that cannot be read or parsed is an error rather than a silent fallback.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let pipeline = match var("FACEGATE_CONFIG") {
            Some(path) => PipelineConfig::load(&PathBuf::from(path))?,
            None => PipelineConfig::default(),
        };

        let db_path = var("FACEGATE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_data_dir(&var).join("faces.db"));

        let defaults = Self::default();
        Ok(Self {
            pipeline,
            db_path,
            camera_device: var("FACEGATE_CAMERA_DEVICE").unwrap_or(defaults.camera_device),
            frame_size: FrameSize::new(
                parse_or(&var, "FACEGATE_FRAME_WIDTH", defaults.frame_size.width),
                parse_or(&var, "FACEGATE_FRAME_HEIGHT", defaults.frame_size.height),
            ),
            reject_duplicates: var("FACEGATE_REJECT_DUPLICATES")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(defaults.reject_duplicates),
        })
    }
}

fn default_data_dir(var: impl Fn(&str) -> Option<String>) -> PathBuf {
    var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
}

fn parse_or<T: std::str::FromStr>(var: impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match var(key) {
        Some(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparseable setting");
            default
        }),
        None => default,
    }
}
