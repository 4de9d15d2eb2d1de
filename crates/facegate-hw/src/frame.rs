//! Frame type and raw pixel-format conversion (NV21, YUYV) to RGB.

use image::RgbImage;
use std::time::Instant;
use tokio::sync::OwnedSemaphorePermit;

/// A camera frame holding one slot of its [`FramePool`](crate::FramePool).
///
/// The slot is returned when the frame is dropped, whichever path drops it.
pub struct Frame {
    pub image: RgbImage,
    /// Clockwise degrees the sensor reports are needed to make the frame upright.
    pub rotation_degrees: i32,
    pub sequence: u64,
    pub timestamp: Instant,
    _lease: OwnedSemaphorePermit,
}

impl Frame {
    pub(crate) fn new(
        image: RgbImage,
        rotation_degrees: i32,
        sequence: u64,
        lease: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            image,
            rotation_degrees,
            sequence,
            timestamp: Instant::now(),
            _lease: lease,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Take the pixels and release the pool slot.
    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .field("rotation_degrees", &self.rotation_degrees)
            .field("sequence", &self.sequence)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid {format} length: expected {expected}, got {actual}")]
    InvalidLength {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("zero-sized frame: {width}x{height}")]
    ZeroSized { width: u32, height: u32 },
    #[error("frame pool exhausted ({capacity} buffers in use)")]
    PoolExhausted { capacity: usize },
}

/// BT.601 full-range YUV to RGB.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    let r = y + 1.402 * v;
    let g = y - 0.344_136 * u - 0.714_136 * v;
    let b = y + 1.772 * u;
    [
        r.round().clamp(0.0, 255.0) as u8,
        g.round().clamp(0.0, 255.0) as u8,
        b.round().clamp(0.0, 255.0) as u8,
    ]
}

fn check_dims(width: u32, height: u32) -> Result<(), FrameError> {
    if width == 0 || height == 0 {
        return Err(FrameError::ZeroSized { width, height });
    }
    Ok(())
}

/// Convert NV21 (full Y plane, then interleaved V/U at quarter resolution) to RGB.
pub fn nv21_to_rgb(nv21: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    check_dims(width, height)?;
    let w = width as usize;
    let h = height as usize;
    let chroma_w = w.div_ceil(2);
    let chroma_h = h.div_ceil(2);
    let y_len = w * h;
    let expected = y_len + chroma_w * chroma_h * 2;
    if nv21.len() < expected {
        return Err(FrameError::InvalidLength {
            format: "NV21",
            expected,
            actual: nv21.len(),
        });
    }

    let (luma, chroma) = nv21.split_at(y_len);
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let c = ((y / 2) * chroma_w + x / 2) * 2;
        image::Rgb(yuv_to_rgb(luma[y * w + x], chroma[c + 1], chroma[c]))
    }))
}

/// Convert packed YUYV 4:2:2 to RGB.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    check_dims(width, height)?;
    let pixels = width as usize * height as usize;
    let expected = pixels.div_ceil(2) * 4;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            format: "YUYV",
            expected,
            actual: yuyv.len(),
        });
    }

    let w = width as usize;
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let p = y as usize * w + x as usize;
        let group = (p / 2) * 4;
        let luma = yuyv[group + (p % 2) * 2];
        image::Rgb(yuv_to_rgb(luma, yuyv[group + 1], yuyv[group + 3]))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nv21_neutral_chroma_is_gray() {
        // 2x2 image: 4 luma bytes, one V/U pair
        let nv21 = vec![0, 64, 128, 255, 128, 128];
        let rgb = nv21_to_rgb(&nv21, 2, 2).unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(rgb.get_pixel(1, 0).0, [64, 64, 64]);
        assert_eq!(rgb.get_pixel(0, 1).0, [128, 128, 128]);
        assert_eq!(rgb.get_pixel(1, 1).0, [255, 255, 255]);
    }

    #[test]
    fn test_nv21_v_before_u() {
        // High V, neutral U: red shifts up, blue stays at luma.
        let nv21 = vec![128, 128, 128, 128, 200, 128];
        let px = nv21_to_rgb(&nv21, 2, 2).unwrap().get_pixel(0, 0).0;
        assert!(px[0] > 200, "red {}", px[0]);
        assert_eq!(px[2], 128);
    }

    #[test]
    fn test_nv21_odd_dimensions() {
        // 3x3 luma + 2x2 chroma pairs
        let nv21 = vec![100u8; 9 + 8];
        let rgb = nv21_to_rgb(&nv21, 3, 3).unwrap();
        assert_eq!(rgb.dimensions(), (3, 3));
    }

    #[test]
    fn test_nv21_short_buffer() {
        let err = nv21_to_rgb(&[0u8; 5], 2, 2).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLength { expected: 6, actual: 5, .. }));
    }

    #[test]
    fn test_yuyv_to_rgb_gray() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let rgb = yuyv_to_rgb(&[100, 128, 200, 128], 2, 1).unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0, [100, 100, 100]);
        assert_eq!(rgb.get_pixel(1, 0).0, [200, 200, 200]);
    }

    #[test]
    fn test_yuyv_shares_chroma_per_pair() {
        let rgb = yuyv_to_rgb(&[128, 255, 128, 128], 2, 1).unwrap();
        assert_eq!(rgb.get_pixel(0, 0), rgb.get_pixel(1, 0));
        assert_eq!(rgb.get_pixel(0, 0).0[2], 255);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_rgb(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_zero_sized_rejected() {
        assert!(matches!(
            yuyv_to_rgb(&[], 0, 4),
            Err(FrameError::ZeroSized { width: 0, height: 4 })
        ));
    }
}
