//! V4L2 frame source via the `v4l` crate.

use crate::camera::{CameraError, FrameSource};
use crate::frame::{self, Frame, FrameError};
use facegate_core::FrameSize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const EBUSY: i32 = 16;
const STREAM_BUFFERS: u32 = 4;

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
    Yuyv,
    Grey,
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        if fourcc == FourCC::new(b"YUYV") {
            Some(PixelFormat::Yuyv)
        } else if fourcc == FourCC::new(b"GREY") {
            Some(PixelFormat::Grey)
        } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
            Some(PixelFormat::Y16)
        } else {
            None
        }
    }

    fn to_grayscale(self, buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
        match self {
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, width, height),
            PixelFormat::Grey => frame::grey_to_grayscale(buf, width, height),
            PixelFormat::Y16 => frame::y16_to_grayscale(buf, width, height),
        }
    }
}

struct Opened {
    device: Device,
    size: FrameSize,
    pixel_format: PixelFormat,
}

/// A V4L2 capture device, opened on `start` and closed on `stop`.
pub struct V4lCamera {
    path: PathBuf,
    requested: FrameSize,
    opened: Option<Opened>,
}

impl V4lCamera {
    /// Camera at `path` (e.g. "/dev/video0"), requesting `size` frames.
    /// The driver may negotiate a different size.
    pub fn new(path: impl Into<PathBuf>, requested: FrameSize) -> Self {
        Self {
            path: path.into(),
            requested,
            opened: None,
        }
    }

    fn open_error(&self, e: io::Error) -> CameraError {
        let path = self.path.display().to_string();
        if e.kind() == io::ErrorKind::PermissionDenied {
            CameraError::PermissionDenied(path)
        } else if e.raw_os_error() == Some(EBUSY) || e.to_string().contains("busy") {
            CameraError::DeviceBusy
        } else {
            CameraError::DeviceNotFound(format!("{path}: {e}"))
        }
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl FrameSource for V4lCamera {
    fn start(&mut self) -> Result<FrameSize, CameraError> {
        if let Some(opened) = &self.opened {
            return Ok(opened.size);
        }
        if !self.path.exists() {
            return Err(CameraError::DeviceNotFound(self.path.display().to_string()));
        }

        let device = Device::with_path(&self.path).map_err(|e| self.open_error(e))?;
        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::CaptureFailed(format!(
                "{} is not a video capture device",
                self.path.display()
            )));
        }

        // Ask for YUYV; IR sensors commonly come back with GREY or Y16.
        let mut fmt = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = self.requested.width;
        fmt.height = self.requested.height;
        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, GREY, or Y16)",
                negotiated.fourcc
            ))
        })?;
        let size = FrameSize::new(negotiated.width, negotiated.height);

        tracing::info!(
            device = %self.path.display(),
            driver = %caps.driver,
            card = %caps.card,
            width = size.width,
            height = size.height,
            fourcc = ?negotiated.fourcc,
            "opened camera"
        );

        self.opened = Some(Opened {
            device,
            size,
            pixel_format,
        });
        Ok(size)
    }

    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let opened = self.opened.as_ref().ok_or(CameraError::NotStarted)?;

        let mut stream = MmapStream::with_buffers(&opened.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let data = opened
            .pixel_format
            .to_grayscale(buf, opened.size.width, opened.size.height)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))?;

        Ok(Frame {
            data,
            width: opened.size.width,
            height: opened.size.height,
            timestamp: Instant::now(),
            sequence: meta.sequence,
        })
    }

    fn stop(&mut self) {
        if self.opened.take().is_some() {
            tracing::info!(device = %self.path.display(), "closed camera");
        }
    }
}
