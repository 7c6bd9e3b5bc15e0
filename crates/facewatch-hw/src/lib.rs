//! facewatch-hw: hardware abstraction for camera capture.
//!
//! Provides V4L2-based colour capture and pixel-format conversion to RGB.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameSource, PixelFormat};
pub use frame::Frame;
