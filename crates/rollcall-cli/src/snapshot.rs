//! Presentation sink that keeps the latest annotated frame on disk as a PNG.

use image::{Rgb, RgbImage};
use rollcall_core::capture::{FaceLabel, PresentationSink, SinkError};
use rollcall_core::frame::Frame;
use std::path::PathBuf;

const MATCHED: Rgb<u8> = Rgb([0, 255, 0]);
const UNMATCHED: Rgb<u8> = Rgb([255, 0, 0]);
const STROKE: u32 = 2;

pub struct SnapshotSink {
    path: PathBuf,
    written: u64,
}

impl SnapshotSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path, written: 0 }
    }
}

impl PresentationSink for SnapshotSink {
    fn present(&mut self, frame: &Frame, labels: &[FaceLabel]) -> Result<(), SinkError> {
        let luma = frame.to_luma().map_err(|e| SinkError(e.to_string()))?;
        let gray = image::GrayImage::from_raw(luma.width, luma.height, luma.data)
            .ok_or_else(|| SinkError("frame buffer does not match its size".into()))?;
        let mut canvas = image::DynamicImage::ImageLuma8(gray).to_rgb8();

        for label in labels {
            let color = if label.code.is_some() { MATCHED } else { UNMATCHED };
            draw_box(&mut canvas, label, color);
            tracing::debug!(
                code = label.code.as_deref().unwrap_or("unknown"),
                distance = label.distance,
                "face labelled"
            );
        }

        canvas
            .save(&self.path)
            .map_err(|e| SinkError(format!("{}: {e}", self.path.display())))?;
        self.written += 1;
        Ok(())
    }

    fn close(&mut self) {
        tracing::info!(path = %self.path.display(), frames = self.written, "snapshot sink closed");
    }
}

/// Outline `label.region`, clipped to the canvas.
fn draw_box(canvas: &mut RgbImage, label: &FaceLabel, color: Rgb<u8>) {
    let (w, h) = canvas.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let clamp = |v: f32, max: u32| (v.max(0.0) as u32).min(max - 1);
    let r = &label.region;
    let x0 = clamp(r.x, w);
    let y0 = clamp(r.y, h);
    let x1 = clamp(r.right(), w);
    let y1 = clamp(r.bottom(), h);
    if x1 < x0 || y1 < y0 {
        return;
    }

    for t in 0..STROKE {
        for x in x0..=x1 {
            canvas.put_pixel(x, (y0 + t).min(y1), color);
            canvas.put_pixel(x, y1.saturating_sub(t).max(y0), color);
        }
        for y in y0..=y1 {
            canvas.put_pixel((x0 + t).min(x1), y, color);
            canvas.put_pixel(x1.saturating_sub(t).max(x0), y, color);
        }
    }
}
