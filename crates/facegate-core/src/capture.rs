//! Auto-capture state machine.
//!
//! A [`CaptureSession`] is driven by two independent tick sources owned by
//! its caller: one quality sample per sampling tick ([`CaptureSession::advance`])
//! and one [`CaptureSession::countdown_tick`] per countdown period while a
//! countdown is running. The session itself holds no timers; the events it
//! returns tell the owner when to start or drop the countdown timer.
//!
//! ```text
//! Idle ──face──▶ Tracking ──≥95/95──▶ CountdownToCapture ──0──▶ Captured
//!  ▲               │  ▲                    │    │
//!  └──face lost────┘  └──quality drop──────┘    └──face lost──▶ Idle
//! ```

use crate::config::{CaptureConfig, PipelineConfig};
use crate::quality::{self, QualityMetrics};
use crate::types::{Descriptor, DetectionResult, FrameSize, QualityLabel};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    Idle,
    Tracking,
    CountdownToCapture,
    Captured,
    Cancelled,
}

impl CaptureState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaptureState::Captured | CaptureState::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureTrigger {
    Auto,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    FaceLost,
    QualityDropped,
}

/// The finalized capture handed on to duplicate search and persistence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureResult {
    pub descriptor: Descriptor,
    pub quality: QualityMetrics,
    pub quality_label: QualityLabel,
    pub trigger: CaptureTrigger,
}

/// Transition reported to the session owner.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CaptureEvent {
    FaceAcquired,
    FaceLost,
    /// Start the countdown timer, replacing any running one.
    CountdownStarted { seconds: u32 },
    CountdownTick { remaining: u32 },
    /// Drop the countdown timer.
    CountdownCancelled { reason: CancelReason },
    /// Terminal: stop all timers and process the capture.
    Finalized(CaptureResult),
}

/// One camera session's capture state.
#[derive(Debug)]
pub struct CaptureSession {
    config: PipelineConfig,
    state: CaptureState,
    countdown_remaining: Option<u32>,
    last_quality: Option<QualityMetrics>,
    last_descriptor: Option<Descriptor>,
}

impl CaptureSession {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            state: CaptureState::Idle,
            countdown_remaining: None,
            last_quality: None,
            last_descriptor: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn countdown_remaining(&self) -> Option<u32> {
        self.countdown_remaining
    }

    pub fn last_quality(&self) -> Option<&QualityMetrics> {
        self.last_quality.as_ref()
    }

    fn capture_config(&self) -> &CaptureConfig {
        &self.config.capture
    }

    /// Feed one sampled frame. `None` means no face (including a failed
    /// detection).
    pub fn advance(&mut self, detection: Option<&DetectionResult>, frame: FrameSize) -> Option<CaptureEvent> {
        let metrics = quality::assess(detection, frame, &self.config.quality);
        self.observe(metrics, detection.map(|d| d.descriptor.clone()))
    }

    /// Feed precomputed metrics for one sample.
    pub fn observe(&mut self, metrics: QualityMetrics, descriptor: Option<Descriptor>) -> Option<CaptureEvent> {
        if self.state.is_terminal() {
            return None;
        }

        let detected = metrics.face_detected && descriptor.is_some();
        let excellent = metrics.meets(
            self.capture_config().auto_capture_min_score,
            self.capture_config().auto_capture_min_confidence,
        );
        self.last_quality = Some(metrics);
        self.last_descriptor = if detected { descriptor } else { None };

        let event = match (self.state, detected) {
            (CaptureState::Idle, false) => None,
            (CaptureState::Idle, true) => {
                self.state = CaptureState::Tracking;
                if excellent {
                    Some(self.start_countdown())
                } else {
                    Some(CaptureEvent::FaceAcquired)
                }
            }
            (CaptureState::Tracking, false) => {
                self.state = CaptureState::Idle;
                Some(CaptureEvent::FaceLost)
            }
            (CaptureState::Tracking, true) => excellent.then(|| self.start_countdown()),
            (CaptureState::CountdownToCapture, false) => {
                self.state = CaptureState::Idle;
                self.countdown_remaining = None;
                Some(CaptureEvent::CountdownCancelled {
                    reason: CancelReason::FaceLost,
                })
            }
            (CaptureState::CountdownToCapture, true) if !excellent => {
                self.state = CaptureState::Tracking;
                self.countdown_remaining = None;
                Some(CaptureEvent::CountdownCancelled {
                    reason: CancelReason::QualityDropped,
                })
            }
            (CaptureState::CountdownToCapture, true) => None,
            (CaptureState::Captured | CaptureState::Cancelled, _) => None,
        };

        if let Some(e) = &event {
            tracing::debug!(state = ?self.state, event = ?EventKind::of(e), "capture transition");
        }
        event
    }

    fn start_countdown(&mut self) -> CaptureEvent {
        let seconds = self.capture_config().countdown_seconds;
        self.state = CaptureState::CountdownToCapture;
        self.countdown_remaining = Some(seconds);
        tracing::info!(seconds, "excellent quality, auto-capture countdown started");
        CaptureEvent::CountdownStarted { seconds }
    }

    /// One countdown period elapsed. Ticks outside a countdown are stale
    /// timer firings and are ignored.
    pub fn countdown_tick(&mut self) -> Option<CaptureEvent> {
        if self.state != CaptureState::CountdownToCapture {
            tracing::debug!(state = ?self.state, "stale countdown tick ignored");
            return None;
        }
        let remaining = self.countdown_remaining.unwrap_or(0).saturating_sub(1);
        if remaining == 0 {
            return self.finalize(CaptureTrigger::Auto).map(CaptureEvent::Finalized);
        }
        self.countdown_remaining = Some(remaining);
        Some(CaptureEvent::CountdownTick { remaining })
    }

    /// Explicit user capture. Accepted while a face is tracked or counting
    /// down; pre-empts any countdown.
    pub fn request_manual_capture(&mut self) -> Option<CaptureResult> {
        match self.state {
            CaptureState::Tracking | CaptureState::CountdownToCapture => {
                self.finalize(CaptureTrigger::Manual)
            }
            CaptureState::Idle => {
                tracing::info!("manual capture refused: no face tracked");
                None
            }
            CaptureState::Captured | CaptureState::Cancelled => None,
        }
    }

    fn finalize(&mut self, trigger: CaptureTrigger) -> Option<CaptureResult> {
        let (Some(descriptor), Some(quality)) = (self.last_descriptor.take(), self.last_quality.clone()) else {
            tracing::warn!(?trigger, "finalize without a tracked face; returning to idle");
            self.reset();
            return None;
        };
        self.state = CaptureState::Captured;
        self.countdown_remaining = None;
        let quality_label = QualityLabel::from_score(quality.overall_score);
        tracing::info!(
            ?trigger,
            score = quality.overall_score,
            confidence = quality.confidence_percent,
            "capture finalized"
        );
        Some(CaptureResult {
            descriptor,
            quality,
            quality_label,
            trigger,
        })
    }

    /// Abort the current attempt: back to `Idle` with nothing retained.
    pub fn cancel(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        tracing::debug!(state = ?self.state, "capture attempt cancelled");
        self.reset();
    }

    /// End the session without a capture.
    pub fn close(&mut self) {
        if self.state == CaptureState::Captured {
            return;
        }
        self.reset();
        self.state = CaptureState::Cancelled;
    }

    fn reset(&mut self) {
        self.state = CaptureState::Idle;
        self.countdown_remaining = None;
        self.last_quality = None;
        self.last_descriptor = None;
    }
}

/// Payload-free event name for logging.
#[derive(Debug)]
enum EventKind {
    FaceAcquired,
    FaceLost,
    CountdownStarted,
    CountdownTick,
    CountdownCancelled,
    Finalized,
}

impl EventKind {
    fn of(event: &CaptureEvent) -> Self {
        match event {
            CaptureEvent::FaceAcquired => EventKind::FaceAcquired,
            CaptureEvent::FaceLost => EventKind::FaceLost,
            CaptureEvent::CountdownStarted { .. } => EventKind::CountdownStarted,
            CaptureEvent::CountdownTick { .. } => EventKind::CountdownTick,
            CaptureEvent::CountdownCancelled { .. } => EventKind::CountdownCancelled,
            CaptureEvent::Finalized(_) => EventKind::Finalized,
        }
    }
}
