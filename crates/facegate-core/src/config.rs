//! Pipeline thresholds.
//!
//! The defaults are the thresholds the capture flow shipped with. Every one
//! of them can be overridden from a TOML file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const FULL_CREDIT_FACE_PX: f32 = 150.0;
pub const READY_MIN_SCORE: f32 = 85.0;
pub const READY_MIN_CONFIDENCE: u8 = 85;
pub const AUTO_CAPTURE_MIN_SCORE: f32 = 95.0;
pub const AUTO_CAPTURE_MIN_CONFIDENCE: u8 = 95;
pub const COUNTDOWN_SECONDS: u32 = 3;
pub const SAMPLE_INTERVAL_MS: u64 = 500;
pub const COUNTDOWN_INTERVAL_MS: u64 = 1000;
/// Empirical upper bound of descriptor distances for the 128-d model.
/// Must be recalibrated if the recognition model changes.
///
/// Similarity is `(1 - min(d, cap)) * 100` clamped at zero, so it already
/// bottoms out at `d = 1.0`. Any cap at or above 1.0, this default included,
/// has no effect on scores; only values below 1.0 change the curve.
pub const MAX_DESCRIPTOR_DISTANCE: f32 = 1.2;
pub const DUPLICATE_THRESHOLD: f32 = 70.0;
pub const VERIFY_THRESHOLD: f32 = 70.0;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Quality scorer thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Minor-axis face size (px) that earns the full size term.
    pub full_credit_face_px: f32,
    pub ready_min_score: f32,
    pub ready_min_confidence: u8,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            full_credit_face_px: FULL_CREDIT_FACE_PX,
            ready_min_score: READY_MIN_SCORE,
            ready_min_confidence: READY_MIN_CONFIDENCE,
        }
    }
}

/// Auto-capture state machine parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub auto_capture_min_score: f32,
    pub auto_capture_min_confidence: u8,
    pub countdown_seconds: u32,
    pub sample_interval_ms: u64,
    pub countdown_interval_ms: u64,
}

impl CaptureConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn countdown_interval(&self) -> Duration {
        Duration::from_millis(self.countdown_interval_ms)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            auto_capture_min_score: AUTO_CAPTURE_MIN_SCORE,
            auto_capture_min_confidence: AUTO_CAPTURE_MIN_CONFIDENCE,
            countdown_seconds: COUNTDOWN_SECONDS,
            sample_interval_ms: SAMPLE_INTERVAL_MS,
            countdown_interval_ms: COUNTDOWN_INTERVAL_MS,
        }
    }
}

/// Descriptor comparison parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub max_distance: f32,
    pub duplicate_threshold: f32,
    pub verify_threshold: f32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            max_distance: MAX_DESCRIPTOR_DISTANCE,
            duplicate_threshold: DUPLICATE_THRESHOLD,
            verify_threshold: VERIFY_THRESHOLD,
        }
    }
}

/// All tunables of the capture and matching pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub quality: QualityConfig,
    pub capture: CaptureConfig,
    pub matching: MatchingConfig,
}

impl PipelineConfig {
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&src)?;
        tracing::info!(path = %path.display(), "loaded pipeline config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("quality.full_credit_face_px", self.quality.full_credit_face_px)?;
        positive("matching.max_distance", self.matching.max_distance)?;
        percentage("quality.ready_min_score", self.quality.ready_min_score)?;
        percentage("capture.auto_capture_min_score", self.capture.auto_capture_min_score)?;
        percentage("matching.duplicate_threshold", self.matching.duplicate_threshold)?;
        percentage("matching.verify_threshold", self.matching.verify_threshold)?;
        if self.capture.countdown_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "capture.countdown_seconds",
                reason: "must be at least 1".into(),
            });
        }
        if self.capture.sample_interval_ms == 0 || self.capture.countdown_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "capture.*_interval_ms",
                reason: "intervals must be non-zero".into(),
            });
        }
        Ok(())
    }
}

fn positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("must be a positive number, got {value}"),
        })
    }
}

// NaN fails the range check.
fn percentage(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("must be within 0..=100, got {value}"),
        })
    }
}
