//! facegate-hw — Frame sources for capture sessions.
//!
//! A [`FrameSource`] is an exclusive camera stream. Sessions hold it through
//! a [`CameraGuard`] so the stream is stopped on every exit path.
//! The V4L2 source is behind the `v4l` feature.

pub mod camera;
pub mod frame;
pub mod synthetic;
#[cfg(feature = "v4l")]
pub mod v4l2;

pub use camera::{CameraError, CameraGuard, FrameSource};
pub use frame::Frame;
pub use synthetic::{CameraStats, SyntheticCamera};
#[cfg(feature = "v4l")]
pub use v4l2::V4lCamera;
