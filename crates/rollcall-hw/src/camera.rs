//! V4L2 camera capture via the `v4l` crate.

use rollcall_core::capture::CaptureSource;
use rollcall_core::frame::{Frame, PixelEncoding};
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Requested capture geometry. The driver may negotiate something else.
pub const REQUESTED_WIDTH: u32 = 640;
pub const REQUESTED_HEIGHT: u32 = 480;

const STREAM_BUFFERS: u32 = 4;

/// Default wait for one buffer before the cycle counts as "no frame".
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_millis(500);

/// Clamp a frame wait to what `poll(2)` accepts: at least 1 ms, at most
/// `i32::MAX` ms. Zero would turn every dequeue into a busy poll.
fn poll_timeout(wait: Duration) -> Duration {
    wait.clamp(Duration::from_millis(1), Duration::from_millis(i32::MAX as u64))
}

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
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
    /// YUYV 4:2:2 packed, handed to the core as-is.
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale, narrowed to 8 bits here.
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        if fourcc == FourCC::new(b"YUYV") {
            Some(Self::Yuyv)
        } else if fourcc == FourCC::new(b"GREY") {
            Some(Self::Grey)
        } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
            Some(Self::Y16)
        } else {
            None
        }
    }
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            let msg = e.to_string();
            if msg.contains("busy") || msg.contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {msg}"))
            }
        })?;

        let info = describe(&device, device_path)
            .map_err(|e| CameraError::CaptureFailed(format!("capability query: {e}")))?
            .ok_or(CameraError::StreamingNotSupported)?;
        tracing::info!(
            device = device_path,
            driver = %info.driver,
            card = %info.name,
            "opened camera"
        );

        let negotiated = device
            .format()
            .and_then(|mut fmt| {
                fmt.fourcc = FourCC::new(b"YUYV");
                fmt.width = REQUESTED_WIDTH;
                fmt.height = REQUESTED_HEIGHT;
                device.set_format(&fmt)
            })
            .map_err(|e| CameraError::FormatNegotiationFailed(e.to_string()))?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, GREY, or Y16)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Start streaming, discarding `warmup` frames while auto-exposure settles.
    ///
    /// Each dequeue waits at most `frame_timeout`, so a stalled device yields
    /// "no frame" instead of blocking the caller.
    pub fn stream(
        &self,
        warmup: usize,
        frame_timeout: Duration,
    ) -> Result<CameraStream<'_>, CameraError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
        stream.set_timeout(poll_timeout(frame_timeout));

        for _ in 0..warmup {
            stream
                .next()
                .map_err(|e| CameraError::CaptureFailed(format!("warmup frame failed: {e}")))?;
        }
        tracing::debug!(warmup, device = %self.device_path, "camera stream ready");

        Ok(CameraStream {
            camera: self,
            stream: Some(stream),
        })
    }

    /// Capture-capable devices among `/dev/video0` through `/dev/video15`.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let device = Device::with_path(&path).ok()?;
                describe(&device, &path).ok().flatten()
            })
            .collect()
    }
}

/// Device description, or `None` if it cannot capture video.
fn describe(device: &Device, path: &str) -> std::io::Result<Option<DeviceInfo>> {
    let caps = device.query_caps()?;
    if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
        return Ok(None);
    }
    Ok(Some(DeviceInfo {
        path: path.to_string(),
        name: caps.card,
        driver: caps.driver,
        bus: caps.bus,
    }))
}

/// An active mmap stream. Dropping the inner stream stops capture.
pub struct CameraStream<'a> {
    camera: &'a Camera,
    stream: Option<MmapStream<'a>>,
}

impl CaptureSource for CameraStream<'_> {
    fn acquire_frame(&mut self) -> Option<Frame> {
        let stream = self.stream.as_mut()?;
        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) if e.kind() == ErrorKind::TimedOut => {
                tracing::debug!(device = %self.camera.device_path, "no buffer within frame timeout");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to dequeue buffer");
                return None;
            }
        };
        let sequence = meta.sequence;

        match raw_to_frame(
            self.camera.pixel_format,
            buf,
            self.camera.width,
            self.camera.height,
        ) {
            Ok(mut frame) => {
                frame.sequence = sequence;
                Some(frame)
            }
            Err(e) => {
                tracing::warn!(error = %e, sequence, "dropping malformed buffer");
                None
            }
        }
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            tracing::info!(device = %self.camera.device_path, "camera stream stopped");
        }
    }
}

impl Drop for CameraStream<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Wrap a dequeued buffer as a frame in the encoding the core understands.
pub fn raw_to_frame(
    format: PixelFormat,
    buf: &[u8],
    width: u32,
    height: u32,
) -> Result<Frame, CameraError> {
    let pixels = (width * height) as usize;

    let (data, encoding) = match format {
        PixelFormat::Grey => {
            if buf.len() < pixels {
                return Err(CameraError::CaptureFailed(format!(
                    "GREY buffer too short: expected {pixels}, got {}",
                    buf.len()
                )));
            }
            (buf[..pixels].to_vec(), PixelEncoding::Gray8)
        }
        PixelFormat::Y16 => {
            let expected = pixels * 2;
            if buf.len() < expected {
                return Err(CameraError::CaptureFailed(format!(
                    "Y16 buffer too short: expected {expected}, got {}",
                    buf.len()
                )));
            }
            // Keep the high byte of each little-endian sample.
            let gray = buf[..expected].chunks_exact(2).map(|px| px[1]).collect();
            (gray, PixelEncoding::Gray8)
        }
        PixelFormat::Yuyv => {
            let expected = pixels * 2;
            if buf.len() < expected {
                return Err(CameraError::CaptureFailed(format!(
                    "YUYV buffer too short: expected {expected}, got {}",
                    buf.len()
                )));
            }
            (buf[..expected].to_vec(), PixelEncoding::Yuyv)
        }
    };

    Ok(Frame::new(data, width, height, encoding))
}
