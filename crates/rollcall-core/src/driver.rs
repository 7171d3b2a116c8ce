//! The session loop: acquire → process → match → observe, until the
//! deadline fires or the session is cancelled.
//!
//! Everything runs sequentially on the calling thread, one frame at a time.

use crate::capture::{CancelFlag, CaptureSource, FaceLabel, PresentationSink};
use crate::detector::FaceLocator;
use crate::gallery::Gallery;
use crate::matcher::Matcher;
use crate::processor::FrameProcessor;
use crate::recognizer::FaceEncoder;
use crate::session::{Clock, EndReason, FinalizedSession, SessionStats, SessionTracker, Tick};

/// Releases the capture source and closes the sink on every exit path,
/// including unwinding out of the loop.
struct ScopedDevices<'a> {
    capture: &'a mut dyn CaptureSource,
    sink: &'a mut dyn PresentationSink,
}

impl Drop for ScopedDevices<'_> {
    fn drop(&mut self) {
        self.sink.close();
        self.capture.release();
        tracing::debug!("capture released");
    }
}

/// Borrowed collaborators for one session run.
pub struct SessionLoop<'a> {
    pub gallery: &'a Gallery,
    pub matcher: &'a dyn Matcher,
    pub threshold: f32,
    pub processor: FrameProcessor,
    pub locator: &'a mut dyn FaceLocator,
    pub encoder: &'a mut dyn FaceEncoder,
    pub clock: &'a dyn Clock,
    pub cancel: &'a CancelFlag,
}

impl SessionLoop<'_> {
    /// Drive `tracker` to completion and finalize it.
    pub fn run(
        self,
        mut tracker: SessionTracker,
        capture: &mut dyn CaptureSource,
        sink: &mut dyn PresentationSink,
    ) -> FinalizedSession {
        let SessionLoop {
            gallery,
            matcher,
            threshold,
            processor,
            locator,
            encoder,
            clock,
            cancel,
        } = self;

        if gallery.is_empty() {
            tracing::warn!("gallery is empty; every member will be reported absent");
        }

        let mut stats = SessionStats::default();
        let end = {
            let devices = ScopedDevices { capture, sink };
            loop {
                if cancel.is_cancelled() {
                    tracing::info!(session = %tracker.id(), "session cancelled");
                    break EndReason::Cancelled;
                }
                if tracker.tick(clock.now()) == Tick::Deadline {
                    break EndReason::Deadline;
                }
                stats.cycles += 1;

                let Some(frame) = devices.capture.acquire_frame() else {
                    stats.frames_missed += 1;
                    continue;
                };

                let observations = match processor.process(&frame, &mut *locator, &mut *encoder) {
                    Ok(observations) => observations,
                    Err(e) => {
                        stats.frames_failed += 1;
                        tracing::warn!(error = %e, sequence = frame.sequence, "frame skipped");
                        continue;
                    }
                };
                stats.frames_processed += 1;
                stats.faces_seen += observations.len() as u64;

                let mut labels = Vec::with_capacity(observations.len());
                for obs in observations {
                    let result = matcher.compare(&obs.embedding, gallery, threshold);
                    if let Some(code) = &result.code {
                        stats.matches += 1;
                        tracker.observe(code);
                    } else {
                        tracing::debug!(distance = result.distance, "face not matched");
                    }
                    labels.push(FaceLabel {
                        region: obs.region,
                        code: result.code,
                        distance: result.distance,
                    });
                }

                if let Err(e) = devices.sink.present(&frame, &labels) {
                    tracing::debug!(error = %e, "presentation sink failed");
                }
            }
        };

        tracker.finalize(clock.now(), end, stats)
    }
}
