//! facegate-core — Face capture quality, auto-capture and descriptor matching.
//!
//! Everything here is synchronous and I/O free. The detection model itself
//! lives behind [`detector::DetectionAdapter`]; cameras, timers and storage
//! belong to `facegate-engine`.

pub mod capture;
pub mod compare;
pub mod config;
pub mod detector;
pub mod duplicate;
pub mod quality;
pub mod record;
pub mod types;

pub use capture::{CaptureEvent, CaptureResult, CaptureSession, CaptureState, CaptureTrigger};
pub use compare::{compare, compare_descriptors, verify, VerifyOutcome};
pub use config::PipelineConfig;
pub use detector::{DetectionAdapter, DetectorError, NormalizingAdapter, RawDetection, RecordedAdapter};
pub use duplicate::{find_duplicates, DuplicateQuery};
pub use quality::QualityMetrics;
pub use types::{
    BoundingBox, Descriptor, DetectionResult, DuplicateCandidate, FaceIdentityRecord, FrameSize,
    MatchConfidence, Point, QualityLabel, Rating,
};
