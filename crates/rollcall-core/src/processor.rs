//! Per-frame face extraction: luma → downsample → locate → embed.
//!
//! Face search runs on a shrunken copy of the frame to bound per-frame
//! latency. Regions are scaled back into full-frame coordinates before they
//! leave this module.

use crate::detector::{DetectorError, FaceLocator};
use crate::frame::{Frame, FrameError};
use crate::recognizer::{FaceEncoder, RecognizerError};
use crate::types::FaceObservation;
use thiserror::Error;

/// Default linear downsampling factor for face search.
pub const DEFAULT_DOWNSAMPLE: f32 = 0.25;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("downsample factor must be in (0, 1], got {0}")]
    InvalidFactor(f32),
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

#[derive(Debug, Clone, Copy)]
pub struct FrameProcessor {
    factor: f32,
}

impl FrameProcessor {
    pub fn new(factor: f32) -> Result<Self, ProcessError> {
        if !(factor > 0.0 && factor <= 1.0) {
            return Err(ProcessError::InvalidFactor(factor));
        }
        Ok(Self { factor })
    }

    pub fn factor(&self) -> f32 {
        self.factor
    }

    /// Extract every face in `frame`. No face is an empty result, not an error.
    pub fn process(
        &self,
        frame: &Frame,
        locator: &mut dyn FaceLocator,
        encoder: &mut dyn FaceEncoder,
    ) -> Result<Vec<FaceObservation>, ProcessError> {
        let small = frame.to_luma()?.downsample(self.factor);
        if small.is_empty() {
            return Ok(Vec::new());
        }

        // Undo the actual resize ratios. Each axis is rounded to whole pixels
        // on its own, so they can differ from the factor and from each other.
        let sx = frame.width as f32 / small.width as f32;
        let sy = frame.height as f32 / small.height as f32;

        let regions = locator.locate(&small)?;
        let mut observations = Vec::with_capacity(regions.len());
        for region in regions {
            let embedding = encoder.encode(&small, &region)?;
            observations.push(FaceObservation {
                region: region.scaled(sx, sy),
                embedding,
            });
        }

        tracing::debug!(
            sequence = frame.sequence,
            faces = observations.len(),
            "frame processed"
        );

        Ok(observations)
    }
}

impl Default for FrameProcessor {
    fn default() -> Self {
        Self {
            factor: DEFAULT_DOWNSAMPLE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{LumaFrame, PixelEncoding};
    use crate::types::{BoundingBox, Embedding};

    /// Finds one face covering every bright pixel, and records the image
    /// size it was asked to search.
    #[derive(Default)]
    struct BrightSpotLocator {
        searched: Vec<(u32, u32)>,
    }

    impl FaceLocator for BrightSpotLocator {
        fn locate(&mut self, image: &LumaFrame) -> Result<Vec<BoundingBox>, DetectorError> {
            self.searched.push((image.width, image.height));
            let w = image.width as usize;
            let bright: Vec<(usize, usize)> = image
                .data
                .iter()
                .enumerate()
                .filter(|&(_, &p)| p > 200)
                .map(|(i, _)| (i % w, i / w))
                .collect();
            let Some(&(x0, y0)) = bright.first() else {
                return Ok(Vec::new());
            };
            let x1 = bright.iter().map(|p| p.0).max().unwrap_or(x0) + 1;
            let y1 = bright.iter().map(|p| p.1).max().unwrap_or(y0) + 1;
            Ok(vec![BoundingBox {
                x: x0 as f32,
                y: y0 as f32,
                width: (x1 - x0) as f32,
                height: (y1 - y0) as f32,
                confidence: 0.99,
                landmarks: Some([(x0 as f32, y0 as f32); 5]),
            }])
        }
    }

    struct ConstEncoder;

    impl FaceEncoder for ConstEncoder {
        fn encode(&mut self, _: &LumaFrame, _: &BoundingBox) -> Result<Embedding, RecognizerError> {
            Ok(Embedding::new(vec![0.25, 0.75]))
        }
    }

    /// 64×32 gray frame with a bright 16×8 block at (16, 8).
    fn frame_with_block(encoding: PixelEncoding) -> Frame {
        let (w, h) = (64usize, 32usize);
        let bpp = encoding.bytes_per_pixel();
        let mut data = vec![20u8; w * h * bpp];
        for y in 8..16 {
            for x in 16..32 {
                let px = (y * w + x) * bpp;
                data[px..px + bpp].fill(255);
            }
        }
        Frame::new(data, w as u32, h as u32, encoding)
    }

    #[test]
    fn test_regions_rescaled_to_frame_coordinates() {
        let processor = FrameProcessor::new(0.25).unwrap();
        let mut locator = BrightSpotLocator::default();

        let obs = processor
            .process(&frame_with_block(PixelEncoding::Bgr8), &mut locator, &mut ConstEncoder)
            .unwrap();

        assert_eq!(locator.searched, vec![(16, 8)]);
        assert_eq!(obs.len(), 1);
        let r = &obs[0].region;
        assert_eq!((r.x, r.y, r.width, r.height), (16.0, 8.0, 16.0, 8.0));
        assert_eq!(r.landmarks, Some([(16.0, 8.0); 5]));
        assert_eq!(obs[0].embedding.values, vec![0.25, 0.75]);
    }

    #[test]
    fn test_uneven_height_rescaled_per_axis() {
        // 30 rows shrink to 8 (ratio 3.75) while 64 columns shrink to 16 (ratio 4).
        let frame = Frame::new(vec![255; 64 * 30], 64, 30, PixelEncoding::Gray8);
        let mut locator = BrightSpotLocator::default();

        let obs = FrameProcessor::new(0.25)
            .unwrap()
            .process(&frame, &mut locator, &mut ConstEncoder)
            .unwrap();

        assert_eq!(locator.searched, vec![(16, 8)]);
        let r = &obs[0].region;
        assert_eq!((r.x, r.y), (0.0, 0.0));
        assert_eq!(r.width, 64.0);
        assert!((r.height - 30.0).abs() < 1e-4, "height {}", r.height);
        assert!(r.bottom() <= 30.0 + 1e-4);
    }

    #[test]
    fn test_no_face_is_empty() {
        let frame = Frame::new(vec![0; 64 * 32], 64, 32, PixelEncoding::Gray8);
        let obs = FrameProcessor::default()
            .process(&frame, &mut BrightSpotLocator::default(), &mut ConstEncoder)
            .unwrap();
        assert!(obs.is_empty());
    }

    #[test]
    fn test_short_frame_is_error() {
        let frame = Frame::new(vec![0; 10], 64, 32, PixelEncoding::Gray8);
        let err = FrameProcessor::default()
            .process(&frame, &mut BrightSpotLocator::default(), &mut ConstEncoder)
            .unwrap_err();
        assert!(matches!(err, ProcessError::Frame(_)));
    }

    #[test]
    fn test_factor_validation() {
        assert!(FrameProcessor::new(0.25).is_ok());
        assert!(FrameProcessor::new(1.0).is_ok());
        assert!(matches!(FrameProcessor::new(0.0), Err(ProcessError::InvalidFactor(_))));
        assert!(FrameProcessor::new(1.5).is_err());
        assert!(FrameProcessor::new(f32::NAN).is_err());
    }
}
