use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Descriptor length produced by the 68-landmark recognition network.
pub const DESCRIPTOR_LEN: usize = 128;

/// A 2D point in source-frame pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Mean position of a group of points, `None` for an empty group.
    pub fn centroid(points: &[Point]) -> Option<Point> {
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f32;
        let (sx, sy) = points
            .iter()
            .fold((0.0f32, 0.0f32), |(sx, sy), p| (sx + p.x, sy + p.y));
        Some(Point::new(sx / n, sy / n))
    }
}

/// Bounding box of a detected face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Length of the shorter side.
    pub fn minor_axis(&self) -> f32 {
        self.width.min(self.height)
    }
}

/// Dimensions of the frame a detection was produced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Face descriptor: a unit-less embedding, only comparable with descriptors
/// from the same model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor(Vec<f32>);

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.0
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    /// Euclidean distance, `None` when the lengths differ.
    pub fn euclidean_distance(&self, other: &Descriptor) -> Option<f32> {
        if self.len() != other.len() {
            return None;
        }
        let sum: f32 = self
            .0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum();
        Some(sum.sqrt())
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// A validated face detection. "No face" is represented by the absence of a
/// value, never by a flag on this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub bbox: BoundingBox,
    pub landmarks: Vec<Point>,
    /// Detector score in [0, 1].
    pub confidence: f32,
    pub descriptor: Descriptor,
}

/// Three-level categorical rating shown to the user while framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Poor,
    Fair,
    Good,
}

/// Coarse capture quality stored alongside a persisted descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLabel {
    Poor,
    Fair,
    Good,
}

impl QualityLabel {
    /// Good at 85 and above, fair at 70 and above.
    pub fn from_score(overall_score: f32) -> Self {
        if overall_score >= 85.0 {
            QualityLabel::Good
        } else if overall_score >= 70.0 {
            QualityLabel::Fair
        } else {
            QualityLabel::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityLabel::Poor => "poor",
            QualityLabel::Fair => "fair",
            QualityLabel::Good => "good",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "poor" => Some(QualityLabel::Poor),
            "fair" => Some(QualityLabel::Fair),
            "good" => Some(QualityLabel::Good),
            _ => None,
        }
    }
}

/// The persisted face identity of one owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceIdentityRecord {
    /// Reference to the person entity owned by the persistence layer.
    pub owner_id: String,
    /// `None` when the stored value could not be decoded.
    pub descriptor: Option<Descriptor>,
    pub quality_label: QualityLabel,
    pub captured_at: DateTime<Utc>,
}

/// Confidence bucket for a similarity percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchConfidence {
    Low,
    Medium,
    High,
}

impl MatchConfidence {
    pub fn from_similarity(similarity_percent: f32) -> Self {
        if similarity_percent >= 70.0 {
            MatchConfidence::High
        } else if similarity_percent >= 50.0 {
            MatchConfidence::Medium
        } else {
            MatchConfidence::Low
        }
    }
}

/// A stored identity that resembles a probe descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateCandidate {
    pub owner_id: String,
    pub similarity_percent: f32,
    /// Index of the source record in the searched slice.
    pub record_index: usize,
    pub confidence: MatchConfidence,
}
