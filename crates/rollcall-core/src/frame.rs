//! Frame types and pixel conversion: luma extraction and bilinear resize.

use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("{encoding:?} buffer too short for {width}x{height}: expected {expected}, got {actual}")]
    InvalidLength {
        encoding: PixelEncoding,
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// Native pixel layout delivered by a capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelEncoding {
    /// 8-bit grayscale, 1 byte/pixel.
    Gray8,
    /// Packed RGB, 3 bytes/pixel.
    Rgb8,
    /// Packed BGR, 3 bytes/pixel (OpenCV-style capture devices).
    Bgr8,
    /// YUYV 4:2:2 packed, 2 bytes/pixel.
    Yuyv,
}

impl PixelEncoding {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Gray8 => 1,
            Self::Yuyv => 2,
            Self::Rgb8 | Self::Bgr8 => 3,
        }
    }
}

/// A raw camera frame in its native encoding.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub encoding: PixelEncoding,
    pub timestamp: Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, encoding: PixelEncoding) -> Self {
        Self {
            data,
            width,
            height,
            encoding,
            timestamp: Instant::now(),
            sequence: 0,
        }
    }

    /// Convert to single-channel luma, the representation the face models consume.
    pub fn to_luma(&self) -> Result<LumaFrame, FrameError> {
        let pixels = self.width as usize * self.height as usize;
        let expected = pixels * self.encoding.bytes_per_pixel();
        if self.data.len() < expected {
            return Err(FrameError::InvalidLength {
                encoding: self.encoding,
                width: self.width,
                height: self.height,
                expected,
                actual: self.data.len(),
            });
        }

        let data = match self.encoding {
            PixelEncoding::Gray8 => self.data[..pixels].to_vec(),
            PixelEncoding::Yuyv => yuyv_to_grayscale(&self.data[..expected]),
            PixelEncoding::Rgb8 => packed_to_luma(&self.data[..expected], [0, 1, 2]),
            PixelEncoding::Bgr8 => packed_to_luma(&self.data[..expected], [2, 1, 0]),
        };

        Ok(LumaFrame {
            data,
            width: self.width,
            height: self.height,
        })
    }
}

/// Single-channel 8-bit image, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct LumaFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl LumaFrame {
    pub fn from_image(image: image::GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Shrink (or keep) the image by a linear `factor` in (0, 1].
    ///
    /// Output dimensions are rounded and never drop below one pixel.
    pub fn downsample(&self, factor: f32) -> LumaFrame {
        if (factor - 1.0).abs() < f32::EPSILON || self.is_empty() {
            return self.clone();
        }
        let new_w = ((self.width as f32 * factor).round() as u32).max(1);
        let new_h = ((self.height as f32 * factor).round() as u32).max(1);
        LumaFrame {
            data: resize_bilinear(
                &self.data,
                self.width as usize,
                self.height as usize,
                new_w as usize,
                new_h as usize,
            ),
            width: new_w,
            height: new_h,
        }
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8]) -> Vec<u8> {
    yuyv.iter().step_by(2).copied().collect()
}

/// BT.601 luma from packed 3-byte pixels; `order` gives the R, G, B offsets.
fn packed_to_luma(buf: &[u8], order: [usize; 3]) -> Vec<u8> {
    buf.chunks_exact(3)
        .map(|px| {
            let r = px[order[0]] as u32;
            let g = px[order[1]] as u32;
            let b = px[order[2]] as u32;
            ((77 * r + 150 * g + 29 * b + 128) >> 8) as u8
        })
        .collect()
}

/// Bilinear resize of a grayscale buffer, sampling at pixel centers.
pub fn resize_bilinear(
    src: &[u8],
    width: usize,
    height: usize,
    new_w: usize,
    new_h: usize,
) -> Vec<u8> {
    let mut out = vec![0u8; new_w * new_h];
    if width == 0 || height == 0 || src.len() < width * height {
        return out;
    }

    let scale_x = width as f32 / new_w as f32;
    let scale_y = height as f32 / new_h as f32;

    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            let tl = src[y0 * width + x0] as f32;
            let tr = src[y0 * width + x1] as f32;
            let bl = src[y1 * width + x0] as f32;
            let br = src[y1 * width + x1] as f32;

            let top = tl + (tr - tl) * fx;
            let bottom = bl + (br - bl) * fx;
            out[y * new_w + x] = (top + (bottom - top) * fy).round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}
