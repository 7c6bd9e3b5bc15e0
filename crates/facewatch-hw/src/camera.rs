//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const STREAM_BUFFERS: u32 = 4;

/// Longest a single dequeue may block before it fails as a capture error.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// A continuous source of colour frames.
///
/// `next_frame` errors are transient from the caller's point of view: the
/// live loop waits and asks again.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, converted to RGB per frame.
    Yuyv,
    /// Motion-JPEG, decoded per frame.
    Mjpeg,
    /// Packed 24-bit RGB.
    Rgb24,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"MJPG" => Some(PixelFormat::Mjpeg),
            b"RGB3" => Some(PixelFormat::Rgb24),
            _ => None,
        }
    }
}

/// V4L2 camera with an open memory-mapped capture stream.
///
/// The stream is created once at open and released on drop.
pub struct Camera {
    stream: MmapStream<'static>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera (e.g. "/dev/video0") and request `width`x`height`.
    ///
    /// YUYV is requested; MJPG or RGB3 are accepted if the driver picks them instead.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, MJPG, or RGB3)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        let mut stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
        stream.set_timeout(DEFAULT_READ_TIMEOUT);

        Ok(Self {
            stream,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc: negotiated.fourcc,
            pixel_format,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Bound how long `capture_frame` waits for the driver. A stalled device
    /// then surfaces as [`CameraError::CaptureFailed`] instead of blocking.
    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.stream.set_timeout(timeout.max(Duration::from_millis(1)));
    }

    /// Dequeue one buffer and convert it to RGB.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let (width, height, pixel_format) = (self.width, self.height, self.pixel_format);

        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::TimedOut {
                    CameraError::CaptureFailed("timed out waiting for a frame".into())
                } else {
                    CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
                }
            })?;
        let used = (meta.bytesused as usize).min(buf.len());
        let data = if used > 0 { &buf[..used] } else { buf };

        let image = match pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(data, width, height),
            PixelFormat::Mjpeg => frame::mjpeg_to_rgb(data),
            PixelFormat::Rgb24 => frame::rgb24_to_rgb(data, width, height),
        }
        .map_err(|e| CameraError::CaptureFailed(format!("{pixel_format:?} conversion failed: {e}")))?;

        Ok(Frame {
            image,
            timestamp: std::time::Instant::now(),
            sequence: meta.sequence,
        })
    }

    /// Capture and drop `count` frames while auto-exposure settles. Failures are ignored.
    pub fn discard_frames(&mut self, count: usize) {
        for _ in 0..count {
            if let Err(e) = self.capture_frame() {
                tracing::debug!(error = %e, "warmup frame failed");
            }
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

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        tracing::info!(device = %self.device_path, "camera released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), Some(PixelFormat::Mjpeg));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"RGB3")), Some(PixelFormat::Rgb24));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), None);
    }

    #[test]
    fn test_open_missing_device() {
        let err = Camera::open("/dev/does-not-exist", 640, 480).err().unwrap();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
    }
}
