//! Live capture-quality scoring.
//!
//! Four terms of up to 25 points each (face size, centring, detector
//! confidence, eye/nose symmetry) sum to a 0–100 score. The scorer never
//! fails: landmark groups it cannot use only zero the symmetry term.

use crate::config::QualityConfig;
use crate::types::{DetectionResult, FrameSize, Point, Rating};
use serde::{Deserialize, Serialize};

const TERM_MAX: f32 = 25.0;

// Lighting is inferred from the overall score, sharpness from the detector
// confidence; neither is measured from pixels.
const LIGHTING_GOOD: f32 = 80.0;
const LIGHTING_FAIR: f32 = 60.0;
const POSITION_GOOD: f32 = 15.0;
const POSITION_FAIR: f32 = 10.0;
const SHARPNESS_GOOD: u8 = 85;
const SHARPNESS_FAIR: u8 = 70;

/// Per-term contributions before rounding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityBreakdown {
    pub size: f32,
    pub position: f32,
    pub confidence: f32,
    pub symmetry: f32,
}

impl QualityBreakdown {
    pub fn total(&self) -> f32 {
        self.size + self.position + self.confidence + self.symmetry
    }
}

/// Quality of one sampled frame. Recomputed every sample, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub face_detected: bool,
    /// Rounded composite score in [0, 100].
    pub overall_score: f32,
    pub confidence_percent: u8,
    pub lighting: Rating,
    pub position: Rating,
    pub sharpness: Rating,
    pub landmark_count: usize,
    pub ready_to_capture: bool,
    pub breakdown: QualityBreakdown,
}

impl QualityMetrics {
    /// Metrics for a frame without a face.
    pub fn undetected() -> Self {
        Self {
            face_detected: false,
            overall_score: 0.0,
            confidence_percent: 0,
            lighting: Rating::Poor,
            position: Rating::Poor,
            sharpness: Rating::Poor,
            landmark_count: 0,
            ready_to_capture: false,
            breakdown: QualityBreakdown::default(),
        }
    }

    /// Whether the sample meets both the score and the confidence threshold.
    pub fn meets(&self, min_score: f32, min_confidence: u8) -> bool {
        self.face_detected && self.overall_score >= min_score && self.confidence_percent >= min_confidence
    }
}

/// Score a detection, or produce undetected metrics for `None`.
pub fn assess(
    detection: Option<&DetectionResult>,
    frame: FrameSize,
    config: &QualityConfig,
) -> QualityMetrics {
    match detection {
        Some(d) => score(d, frame, config),
        None => QualityMetrics::undetected(),
    }
}

/// Score one detected face against the frame it was found in.
pub fn score(detection: &DetectionResult, frame: FrameSize, config: &QualityConfig) -> QualityMetrics {
    let breakdown = QualityBreakdown {
        size: size_term(detection, config.full_credit_face_px),
        position: position_term(detection, frame),
        confidence: detection.confidence.clamp(0.0, 1.0) * TERM_MAX,
        symmetry: symmetry_term(&detection.landmarks),
    };

    let overall_score = breakdown.total().round().clamp(0.0, 100.0);
    let confidence_percent = (detection.confidence.clamp(0.0, 1.0) * 100.0).round() as u8;

    QualityMetrics {
        face_detected: true,
        overall_score,
        confidence_percent,
        lighting: rate(overall_score, LIGHTING_GOOD, LIGHTING_FAIR),
        position: rate(breakdown.position, POSITION_GOOD, POSITION_FAIR),
        sharpness: rate(
            confidence_percent as f32,
            SHARPNESS_GOOD as f32,
            SHARPNESS_FAIR as f32,
        ),
        landmark_count: detection.landmarks.len(),
        ready_to_capture: overall_score >= config.ready_min_score
            && confidence_percent >= config.ready_min_confidence,
        breakdown,
    }
}

fn rate(value: f32, good_above: f32, fair_above: f32) -> Rating {
    if value > good_above {
        Rating::Good
    } else if value > fair_above {
        Rating::Fair
    } else {
        Rating::Poor
    }
}

fn size_term(detection: &DetectionResult, full_credit_px: f32) -> f32 {
    (detection.bbox.minor_axis() / full_credit_px).clamp(0.0, 1.0) * TERM_MAX
}

fn position_term(detection: &DetectionResult, frame: FrameSize) -> f32 {
    let frame_center = Point::new(frame.width as f32 / 2.0, frame.height as f32 / 2.0);
    let max_distance = frame_center.distance(&Point::new(0.0, 0.0));
    if max_distance <= 0.0 {
        return 0.0;
    }
    let offset = detection.bbox.center().distance(&frame_center);
    ((1.0 - offset / max_distance) * TERM_MAX).max(0.0)
}

/// Landmark index groups used for the symmetry check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkLayout {
    /// Five-point detector output: eyes, nose tip, mouth corners.
    FivePoint,
    /// 68-point iBUG annotation.
    Ibug68,
    /// 468/478-point face mesh (the extra ten are iris points).
    FaceMesh,
}

const FIVE_POINT_LEFT_EYE: &[usize] = &[0];
const FIVE_POINT_RIGHT_EYE: &[usize] = &[1];
const FIVE_POINT_NOSE: &[usize] = &[2];

const IBUG68_LEFT_EYE: &[usize] = &[36, 37, 38, 39, 40, 41];
const IBUG68_RIGHT_EYE: &[usize] = &[42, 43, 44, 45, 46, 47];
const IBUG68_NOSE: &[usize] = &[27, 28, 29, 30, 31, 32, 33, 34, 35];

const MESH_LEFT_EYE: &[usize] = &[
    33, 7, 163, 144, 145, 153, 154, 155, 133, 173, 157, 158, 159, 160, 161, 246,
];
const MESH_RIGHT_EYE: &[usize] = &[
    362, 382, 381, 380, 374, 373, 390, 249, 263, 466, 388, 387, 386, 385, 384, 398,
];
const MESH_NOSE: &[usize] = &[168, 6, 197, 195, 5, 4, 1, 19, 94];

impl LandmarkLayout {
    pub fn for_count(count: usize) -> Option<Self> {
        match count {
            5 => Some(LandmarkLayout::FivePoint),
            68 => Some(LandmarkLayout::Ibug68),
            468 | 478 => Some(LandmarkLayout::FaceMesh),
            _ => None,
        }
    }

    /// Index groups: (left eye, right eye, nose).
    fn groups(&self) -> (&'static [usize], &'static [usize], &'static [usize]) {
        match self {
            LandmarkLayout::FivePoint => (FIVE_POINT_LEFT_EYE, FIVE_POINT_RIGHT_EYE, FIVE_POINT_NOSE),
            LandmarkLayout::Ibug68 => (IBUG68_LEFT_EYE, IBUG68_RIGHT_EYE, IBUG68_NOSE),
            LandmarkLayout::FaceMesh => (MESH_LEFT_EYE, MESH_RIGHT_EYE, MESH_NOSE),
        }
    }
}

fn pick(landmarks: &[Point], indices: &[usize]) -> Vec<Point> {
    indices.iter().filter_map(|&i| landmarks.get(i).copied()).collect()
}

/// Eye-to-nose distance balance, 0 when it cannot be computed.
fn symmetry_term(landmarks: &[Point]) -> f32 {
    let Some(layout) = LandmarkLayout::for_count(landmarks.len()) else {
        return 0.0;
    };
    let (left_idx, right_idx, nose_idx) = layout.groups();
    let nose = pick(landmarks, nose_idx);

    let (Some(left_eye), Some(right_eye)) = (
        Point::centroid(&pick(landmarks, left_idx)),
        Point::centroid(&pick(landmarks, right_idx)),
    ) else {
        return 0.0;
    };
    let Some(nose_mid) = nose.get(nose.len() / 2) else {
        return 0.0;
    };

    let left = left_eye.distance(nose_mid);
    let right = right_eye.distance(nose_mid);
    let longer = left.max(right);
    if longer.is_nan() || longer <= 0.0 {
        return 0.0;
    }
    (left.min(right) / longer) * TERM_MAX
}
