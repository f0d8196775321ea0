//! Grayscale frame type and raw format conversion.

use image::GrayImage;
use std::time::Instant;

/// A captured 8-bit grayscale frame.
#[derive(Clone)]
pub struct Frame {
    /// Row-major pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
    pub sequence: u32,
}

impl Frame {
    /// Wrap a decoded grayscale image.
    pub fn from_luma(image: GrayImage, sequence: u32) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            timestamp: Instant::now(),
            sequence,
        }
    }

    /// Copy into an `image` buffer, e.g. for saving a preview.
    pub fn to_image(&self) -> Result<GrayImage, FrameError> {
        let expected = (self.width as usize) * (self.height as usize);
        if self.data.len() < expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: self.data.len(),
            });
        }
        GrayImage::from_raw(self.width, self.height, self.data[..expected].to_vec()).ok_or(
            FrameError::InvalidLength {
                expected,
                actual: self.data.len(),
            },
        )
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by keeping the Y samples.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Convert 16-bit little-endian grayscale to 8-bit by keeping the high byte.
pub fn y16_to_grayscale(y16: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if y16.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: y16.len(),
        });
    }
    Ok(y16[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_grayscale() {
        let yuyv: Vec<u8> = (0..16).collect();
        assert_eq!(yuyv_to_grayscale(&yuyv, 4, 2).unwrap(), vec![0, 2, 4, 6, 8, 10, 12, 14]);
        assert!(yuyv_to_grayscale(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        let y16 = [0x34, 0x12, 0xff, 0x80];
        assert_eq!(y16_to_grayscale(&y16, 2, 1).unwrap(), vec![0x12, 0x80]);
        assert!(y16_to_grayscale(&y16, 2, 2).is_err());
    }

    #[test]
    fn test_image_roundtrip_dimensions() {
        let img = GrayImage::from_pixel(5, 3, image::Luma([42]));
        let frame = Frame::from_luma(img, 7);
        assert_eq!((frame.width, frame.height, frame.sequence), (5, 3, 7));
        let back = frame.to_image().unwrap();
        assert_eq!(back.dimensions(), (5, 3));
        assert_eq!(back.get_pixel(4, 2).0[0], 42);
    }
}
