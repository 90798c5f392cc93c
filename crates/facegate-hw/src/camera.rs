//! Frame source contract and scoped camera acquisition.

use crate::frame::Frame;
use facegate_core::FrameSize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("stream not started")]
    NotStarted,
}

/// An exclusive stream of grayscale frames.
///
/// Calls block; async callers run them on a blocking thread.
pub trait FrameSource {
    /// Acquire the device and start streaming.
    fn start(&mut self) -> Result<FrameSize, CameraError>;

    fn next_frame(&mut self) -> Result<Frame, CameraError>;

    /// Release the device. Must be safe to call when not started.
    fn stop(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn start(&mut self) -> Result<FrameSize, CameraError> {
        (**self).start()
    }

    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        (**self).next_frame()
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}

/// A started frame source, stopped when the guard is dropped.
pub struct CameraGuard<S: FrameSource> {
    source: S,
    size: FrameSize,
}

impl<S: FrameSource> CameraGuard<S> {
    pub fn acquire(mut source: S) -> Result<Self, CameraError> {
        let size = source.start()?;
        tracing::debug!(width = size.width, height = size.height, "camera acquired");
        Ok(Self { source, size })
    }

    /// Negotiated frame size.
    pub fn size(&self) -> FrameSize {
        self.size
    }

    pub fn next_frame(&mut self) -> Result<Frame, CameraError> {
        self.source.next_frame()
    }
}

impl<S: FrameSource> Drop for CameraGuard<S> {
    fn drop(&mut self) {
        self.source.stop();
        tracing::debug!("camera released");
    }
}
