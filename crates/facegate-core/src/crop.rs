//! Face cropping from a reconciled capture frame.

use image::{imageops, RgbImage};
use thiserror::Error;

use crate::mapper::AlignedRegion;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CropError {
    #[error("region {x},{y} {width}x{height} does not fit a {image_width}x{image_height} image")]
    RegionOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        image_width: u32,
        image_height: u32,
    },
    #[error("cropped image has unexpected size {actual_width}x{actual_height}")]
    SizeMismatch {
        actual_width: u32,
        actual_height: u32,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FaceCropper;

impl FaceCropper {
    /// Copy `region` out of `source` into a newly allocated image.
    ///
    /// The source is consumed and released before returning, on success and
    /// failure alike.
    pub fn crop(&self, source: RgbImage, region: &AlignedRegion) -> Result<RgbImage, CropError> {
        let (image_width, image_height) = source.dimensions();
        if !region.fits(image_width, image_height) {
            tracing::warn!(
                ?region,
                image_width,
                image_height,
                "crop region does not fit capture frame"
            );
            return Err(CropError::RegionOutOfBounds {
                x: region.x(),
                y: region.y(),
                width: region.width(),
                height: region.height(),
                image_width,
                image_height,
            });
        }

        let face = imageops::crop_imm(&source, region.x(), region.y(), region.width(), region.height())
            .to_image();
        drop(source);

        if face.dimensions() != (region.width(), region.height()) {
            return Err(CropError::SizeMismatch {
                actual_width: face.width(),
                actual_height: face.height(),
            });
        }

        tracing::debug!(width = face.width(), height = face.height(), "face cropped");
        Ok(face)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 0]))
    }

    #[test]
    fn test_crop_exact_size_and_content() {
        let region = AlignedRegion::new(10, 20, 30, 40, 100, 80).unwrap();
        let face = FaceCropper.crop(gradient(100, 80), &region).unwrap();
        assert_eq!(face.dimensions(), (30, 40));
        assert_eq!(face.get_pixel(0, 0), &Rgb([10, 20, 0]));
        assert_eq!(face.get_pixel(29, 39), &Rgb([39, 59, 0]));
    }

    #[test]
    fn test_crop_full_frame() {
        let region = AlignedRegion::new(0, 0, 64, 48, 64, 48).unwrap();
        let face = FaceCropper.crop(gradient(64, 48), &region).unwrap();
        assert_eq!(face, gradient(64, 48));
    }

    #[test]
    fn test_crop_rejects_region_for_larger_frame() {
        // Region validated against a 200x200 frame, applied to a 100x100 one.
        let region = AlignedRegion::new(90, 90, 50, 50, 200, 200).unwrap();
        let err = FaceCropper.crop(gradient(100, 100), &region).unwrap_err();
        assert!(matches!(err, CropError::RegionOutOfBounds { image_width: 100, .. }));
    }
}
