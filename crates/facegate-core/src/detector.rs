//! Detection adapter boundary.
//!
//! The pretrained detection/landmark/descriptor model lives outside this
//! crate. Whatever wraps it implements [`DetectionAdapter`] and returns the
//! model's loosely shaped output as a [`RawDetection`]; everything past this
//! module only ever sees a validated [`DetectionResult`].

use crate::types::{BoundingBox, Descriptor, DetectionResult, Point};
use serde::Deserialize;
use std::collections::VecDeque;
use std::io::BufRead;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("detection has no bounding box")]
    MissingBox,
    #[error("invalid bounding box: {width}x{height}")]
    InvalidBox { width: f32, height: f32 },
    #[error("detection has no descriptor")]
    MissingDescriptor,
    #[error("descriptor length {actual} does not match expected {expected}")]
    DescriptorLength { expected: usize, actual: usize },
    #[error("detection contains non-finite values")]
    NonFinite,
    #[error("recorded detections: {0}")]
    Recording(String),
}

/// Bounding box as reported by the model.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Unvalidated model output. Field aliases accept the `box` / `score` /
/// `positions` naming used by browser face-api exports.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawDetection {
    #[serde(alias = "box")]
    pub bbox: Option<RawBox>,
    #[serde(alias = "score")]
    pub confidence: Option<f32>,
    #[serde(alias = "positions")]
    pub landmarks: Vec<Point>,
    pub descriptor: Option<Vec<f32>>,
}

/// A face detector + landmark + descriptor model.
///
/// One call per frame; `Ok(None)` means no face in the frame. Implementations
/// are injected into the capture runner rather than reached through globals.
pub trait DetectionAdapter {
    fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<RawDetection>, DetectorError>;
}

impl<A: DetectionAdapter + ?Sized> DetectionAdapter for Box<A> {
    fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<RawDetection>, DetectorError> {
        (**self).detect(frame, width, height)
    }
}

impl DetectionResult {
    /// Validate raw model output.
    ///
    /// The confidence is clamped to [0, 1] (a missing score counts as 0);
    /// the box, landmarks and descriptor must be finite and the descriptor
    /// must have `expected_len` values.
    pub fn from_raw(raw: RawDetection, expected_len: usize) -> Result<Self, DetectorError> {
        let b = raw.bbox.ok_or(DetectorError::MissingBox)?;
        if ![b.x, b.y, b.width, b.height].iter().all(|v| v.is_finite()) {
            return Err(DetectorError::NonFinite);
        }
        if b.width <= 0.0 || b.height <= 0.0 {
            return Err(DetectorError::InvalidBox {
                width: b.width,
                height: b.height,
            });
        }

        let confidence = raw.confidence.unwrap_or(0.0);
        if !confidence.is_finite() {
            return Err(DetectorError::NonFinite);
        }

        if raw.landmarks.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(DetectorError::NonFinite);
        }

        let values = raw.descriptor.ok_or(DetectorError::MissingDescriptor)?;
        if values.len() != expected_len {
            return Err(DetectorError::DescriptorLength {
                expected: expected_len,
                actual: values.len(),
            });
        }
        let descriptor = Descriptor::new(values);
        if !descriptor.is_finite() {
            return Err(DetectorError::NonFinite);
        }

        Ok(Self {
            bbox: BoundingBox {
                x: b.x,
                y: b.y,
                width: b.width,
                height: b.height,
            },
            landmarks: raw.landmarks,
            confidence: confidence.clamp(0.0, 1.0),
            descriptor,
        })
    }
}

/// Wraps an adapter and normalizes its output at the boundary.
///
/// The descriptor length is fixed either up front or by the first accepted
/// detection; later detections of another length are rejected.
pub struct NormalizingAdapter<A> {
    inner: A,
    descriptor_len: Option<usize>,
}

impl<A: DetectionAdapter> NormalizingAdapter<A> {
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            descriptor_len: None,
        }
    }

    pub fn with_descriptor_len(inner: A, len: usize) -> Self {
        Self {
            inner,
            descriptor_len: Some(len),
        }
    }

    pub fn descriptor_len(&self) -> Option<usize> {
        self.descriptor_len
    }

    /// Run the model on one frame and validate the result.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<DetectionResult>, DetectorError> {
        let Some(raw) = self.inner.detect(frame, width, height)? else {
            return Ok(None);
        };

        let expected = match (self.descriptor_len, raw.descriptor.as_ref()) {
            (Some(len), _) => len,
            (None, Some(values)) => values.len(),
            (None, None) => return Err(DetectorError::MissingDescriptor),
        };

        let detection = DetectionResult::from_raw(raw, expected)?;
        if self.descriptor_len.is_none() {
            tracing::debug!(len = expected, "descriptor length locked");
            self.descriptor_len = Some(expected);
        }
        Ok(Some(detection))
    }
}

/// Replays prerecorded model output, one entry per call.
///
/// Each entry is either a detection or `None` (no face). Once the recording
/// is exhausted every call reports no face.
#[derive(Debug, Default)]
pub struct RecordedAdapter {
    entries: VecDeque<Option<RawDetection>>,
}

impl RecordedAdapter {
    pub fn new(entries: impl IntoIterator<Item = Option<RawDetection>>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Parse JSON lines: one detection object or `null` per line. Blank
    /// lines are skipped.
    pub fn from_json_lines(reader: impl BufRead) -> Result<Self, DetectorError> {
        let mut entries = VecDeque::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| DetectorError::Recording(format!("line {}: {e}", i + 1)))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let entry: Option<RawDetection> = serde_json::from_str(line)
                .map_err(|e| DetectorError::Recording(format!("line {}: {e}", i + 1)))?;
            entries.push_back(entry);
        }
        Ok(Self { entries })
    }

    pub fn remaining(&self) -> usize {
        self.entries.len()
    }
}

impl DetectionAdapter for RecordedAdapter {
    fn detect(
        &mut self,
        _frame: &[u8],
        _width: u32,
        _height: u32,
    ) -> Result<Option<RawDetection>, DetectorError> {
        Ok(self.entries.pop_front().flatten())
    }
}
