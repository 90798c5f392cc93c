//! In-memory frame source for replay, CLI dry runs and tests.

use crate::camera::{CameraError, FrameSource};
use crate::frame::Frame;
use facegate_core::FrameSize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Default)]
struct Counters {
    starts: AtomicU32,
    stops: AtomicU32,
    frames: AtomicU32,
    streaming: AtomicBool,
}

/// Shared view of a [`SyntheticCamera`]'s lifecycle, readable after the
/// camera has been moved into a session.
#[derive(Debug, Clone, Default)]
pub struct CameraStats(Arc<Counters>);

impl CameraStats {
    pub fn starts(&self) -> u32 {
        self.0.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u32 {
        self.0.stops.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> u32 {
        self.0.frames.load(Ordering::SeqCst)
    }

    pub fn is_streaming(&self) -> bool {
        self.0.streaming.load(Ordering::SeqCst)
    }
}

/// Produces blank frames of a fixed size.
#[derive(Debug)]
pub struct SyntheticCamera {
    size: FrameSize,
    acquire_error: Option<CameraError>,
    fail_every: Option<u32>,
    sequence: u32,
    stats: CameraStats,
}

impl SyntheticCamera {
    pub fn new(size: FrameSize) -> Self {
        Self {
            size,
            acquire_error: None,
            fail_every: None,
            sequence: 0,
            stats: CameraStats::default(),
        }
    }

    /// Make `start` fail with `error`.
    pub fn with_acquire_error(mut self, error: CameraError) -> Self {
        self.acquire_error = Some(error);
        self
    }

    /// Make every `n`th frame read fail.
    pub fn with_read_failures(mut self, n: u32) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    pub fn stats(&self) -> CameraStats {
        self.stats.clone()
    }
}

impl FrameSource for SyntheticCamera {
    fn start(&mut self) -> Result<FrameSize, CameraError> {
        if let Some(err) = self.acquire_error.clone() {
            tracing::warn!(error = %err, "synthetic camera acquisition failed");
            return Err(err);
        }
        self.stats.0.starts.fetch_add(1, Ordering::SeqCst);
        self.stats.0.streaming.store(true, Ordering::SeqCst);
        Ok(self.size)
    }

    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        if !self.stats.is_streaming() {
            return Err(CameraError::NotStarted);
        }
        self.sequence = self.sequence.wrapping_add(1);
        if let Some(n) = self.fail_every {
            if self.sequence % n == 0 {
                return Err(CameraError::CaptureFailed(format!(
                    "synthetic read failure at frame {}",
                    self.sequence
                )));
            }
        }
        self.stats.0.frames.fetch_add(1, Ordering::SeqCst);
        Ok(Frame {
            data: vec![0; self.size.width as usize * self.size.height as usize],
            width: self.size.width,
            height: self.size.height,
            timestamp: Instant::now(),
            sequence: self.sequence,
        })
    }

    fn stop(&mut self) {
        if self.stats.0.streaming.swap(false, Ordering::SeqCst) {
            self.stats.0.stops.fetch_add(1, Ordering::SeqCst);
        }
    }
}
