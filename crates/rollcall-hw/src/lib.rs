//! rollcall-hw: V4L2 camera capture.
//!
//! Opens a capture device, negotiates YUYV/GREY/Y16 and exposes the mmap
//! stream as a [`rollcall_core::CaptureSource`].

pub mod camera;

pub use camera::{Camera, CameraError, CameraStream, DeviceInfo, PixelFormat, DEFAULT_FRAME_TIMEOUT};
