//! Frame type and pixel-format conversion to RGB.

use image::{ImageFormat, RgbImage};

/// A captured colour camera frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Average luma (0.0–255.0), BT.601 weights.
    pub fn avg_brightness(&self) -> f32 {
        let pixels = self.image.pixels().len();
        if pixels == 0 {
            return 0.0;
        }
        let sum: f32 = self
            .image
            .pixels()
            .map(|p| 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32)
            .sum();
        sum / pixels as f32
    }
}

/// Convert packed YUYV (4:2:2) to RGB.
///
/// Each 4-byte group `[Y0, U, Y1, V]` carries two pixels sharing one chroma pair.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected || width % 2 != 0 {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for group in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (group[0], group[1], group[2], group[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }

    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected,
        actual: yuyv.len(),
    })
}

/// BT.601 limited-range YCbCr to RGB.
fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = (y as f32 - 16.0) * 1.164;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    [
        (c + 1.596 * e).round().clamp(0.0, 255.0) as u8,
        (c - 0.392 * d - 0.813 * e).round().clamp(0.0, 255.0) as u8,
        (c + 2.017 * d).round().clamp(0.0, 255.0) as u8,
    ]
}

/// Decode one Motion-JPEG frame.
pub fn mjpeg_to_rgb(jpeg: &[u8]) -> Result<RgbImage, FrameError> {
    Ok(image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)?.to_rgb8())
}

/// Copy a packed 24-bit RGB buffer.
pub fn rgb24_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 3) as usize;
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    RgbImage::from_raw(width, height, buf[..expected].to_vec()).ok_or(FrameError::InvalidLength {
        expected,
        actual: buf.len(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("MJPEG decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_yuyv_grey_pixels() {
        // 2x1 image, neutral chroma: Y=16 is black, Y=235 is white
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(*rgb.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*rgb.get_pixel(1, 0), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_yuyv_red_chroma() {
        // Saturated red in BT.601: Y=81, Cb=90, Cr=240
        let rgb = yuyv_to_rgb(&[81, 90, 81, 240], 2, 1).unwrap();
        let p = rgb.get_pixel(0, 0);
        assert!(p[0] > 240, "red channel {}", p[0]);
        assert!(p[1] < 15, "green channel {}", p[1]);
        assert!(p[2] < 15, "blue channel {}", p[2]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_rgb(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_rgb24_copy() {
        let buf: Vec<u8> = (0..12).collect();
        let rgb = rgb24_to_rgb(&buf, 2, 2).unwrap();
        assert_eq!(*rgb.get_pixel(1, 1), Rgb([9, 10, 11]));
        assert!(rgb24_to_rgb(&buf[..11], 2, 2).is_err());
    }

    #[test]
    fn test_mjpeg_roundtrip_dimensions() {
        let source = RgbImage::from_pixel(16, 8, Rgb([200, 100, 50]));
        let mut jpeg = Vec::new();
        source
            .write_to(&mut std::io::Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .unwrap();
        let decoded = mjpeg_to_rgb(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (16, 8));
    }

    #[test]
    fn test_mjpeg_garbage() {
        assert!(mjpeg_to_rgb(&[0, 1, 2, 3]).is_err());
    }

    #[test]
    fn test_avg_brightness() {
        let frame = Frame {
            image: RgbImage::from_pixel(4, 4, Rgb([100, 100, 100])),
            timestamp: std::time::Instant::now(),
            sequence: 0,
        };
        assert!((frame.avg_brightness() - 100.0).abs() < 0.01);
    }
}
