//! Capture-source and presentation seams, plus the cancellation flag.

use crate::frame::Frame;
use crate::types::BoundingBox;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// A camera or other frame producer, polled once per session cycle.
pub trait CaptureSource {
    /// Next frame, or `None` if nothing could be acquired this cycle.
    /// May block while waiting on the device.
    fn acquire_frame(&mut self) -> Option<Frame>;

    /// Give the device back. Called once when the session loop exits.
    fn release(&mut self);
}

/// One face drawn on the presentation surface.
#[derive(Debug, Clone)]
pub struct FaceLabel {
    /// Region in full-frame coordinates.
    pub region: BoundingBox,
    /// Matched identity code, if the face was accepted.
    pub code: Option<String>,
    pub distance: f32,
}

#[derive(Debug, Error)]
#[error("presentation failed: {0}")]
pub struct SinkError(pub String);

/// Optional visual feedback. Failures here never touch session state.
pub trait PresentationSink {
    fn present(&mut self, frame: &Frame, labels: &[FaceLabel]) -> Result<(), SinkError>;

    /// Tear down the surface. Called once when the session loop exits.
    fn close(&mut self) {}
}

/// Presentation sink that shows nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PresentationSink for NullSink {
    fn present(&mut self, _: &Frame, _: &[FaceLabel]) -> Result<(), SinkError> {
        Ok(())
    }
}

/// User-initiated abort, shared between the session thread and whoever
/// listens for the request.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
