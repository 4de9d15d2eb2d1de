//! Right-angle sensor rotations.
//!
//! A rotation is the clockwise turn that brings a buffer upright, as reported
//! by the camera stack alongside each frame.

use image::{imageops, RgbImage};
use thiserror::Error;

use crate::types::FaceBox;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RotationError {
    #[error("rotation must be a multiple of 90 degrees, got {0}")]
    NotRightAngle(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Accepts any multiple of 90, including negative values and whole turns.
    pub fn from_degrees(degrees: i32) -> Result<Self, RotationError> {
        if degrees % 90 != 0 {
            return Err(RotationError::NotRightAngle(degrees));
        }
        Ok(match degrees.rem_euclid(360) {
            0 => Self::Deg0,
            90 => Self::Deg90,
            180 => Self::Deg180,
            _ => Self::Deg270,
        })
    }

    pub fn degrees(self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// The clockwise turn that brings a buffer in orientation `self` into
    /// orientation `reference`.
    pub fn relative_to(self, reference: Rotation) -> Rotation {
        let delta = self.degrees() as i32 - reference.degrees() as i32;
        // Always a multiple of 90.
        Self::from_degrees(delta).unwrap_or_default()
    }

    pub fn inverse(self) -> Rotation {
        match self {
            Self::Deg0 => Self::Deg0,
            Self::Deg90 => Self::Deg270,
            Self::Deg180 => Self::Deg180,
            Self::Deg270 => Self::Deg90,
        }
    }

    pub fn swaps_axes(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }

    /// Dimensions of a `width` x `height` frame after this rotation.
    pub fn rotated_dims(self, width: u32, height: u32) -> (u32, u32) {
        if self.swaps_axes() {
            (height, width)
        } else {
            (width, height)
        }
    }

    /// Rotate an image clockwise. The identity returns the input untouched.
    pub fn apply(self, image: RgbImage) -> RgbImage {
        match self {
            Self::Deg0 => image,
            Self::Deg90 => imageops::rotate90(&image),
            Self::Deg180 => imageops::rotate180(&image),
            Self::Deg270 => imageops::rotate270(&image),
        }
    }

    /// Move a box from a `width` x `height` frame into the same frame rotated
    /// clockwise by `self`. Pixel edges map onto pixel edges.
    pub fn rotate_rect(self, rect: FaceBox, width: f32, height: f32) -> FaceBox {
        let r = rect.normalized();
        match self {
            Self::Deg0 => rect,
            Self::Deg90 => FaceBox::new(height - r.bottom, r.left, height - r.top, r.right),
            Self::Deg180 => FaceBox::new(width - r.right, height - r.bottom, width - r.left, height - r.top),
            Self::Deg270 => FaceBox::new(r.top, width - r.right, r.bottom, width - r.left),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_whole_turns_are_identity() {
        for deg in [0, 360, -360, 720, -1080] {
            assert_eq!(Rotation::from_degrees(deg), Ok(Rotation::Deg0), "deg = {deg}");
        }
    }

    #[test]
    fn test_negative_degrees_normalize() {
        assert_eq!(Rotation::from_degrees(-90), Ok(Rotation::Deg270));
        assert_eq!(Rotation::from_degrees(450), Ok(Rotation::Deg90));
    }

    #[test]
    fn test_rejects_non_right_angles() {
        assert_eq!(
            Rotation::from_degrees(45),
            Err(RotationError::NotRightAngle(45))
        );
    }

    #[test]
    fn test_relative_to() {
        assert_eq!(Rotation::Deg90.relative_to(Rotation::Deg0), Rotation::Deg90);
        assert_eq!(Rotation::Deg0.relative_to(Rotation::Deg90), Rotation::Deg270);
        assert_eq!(Rotation::Deg270.relative_to(Rotation::Deg270), Rotation::Deg0);
    }

    #[test]
    fn test_identity_rect_unchanged() {
        let rect = FaceBox::new(30.0, 10.0, 5.0, 40.0);
        assert_eq!(Rotation::Deg0.rotate_rect(rect, 100.0, 50.0), rect);
    }

    #[test]
    fn test_identity_image_unchanged() {
        let img = RgbImage::from_fn(7, 3, |x, y| Rgb([x as u8, y as u8, 9]));
        let out = Rotation::from_degrees(360).unwrap().apply(img.clone());
        assert_eq!(out, img);
    }

    #[test]
    fn test_rotate_rect_roundtrip() {
        let rect = FaceBox::new(10.0, 20.0, 30.0, 45.0);
        for rot in [Rotation::Deg90, Rotation::Deg180, Rotation::Deg270] {
            let (w, h) = (100.0, 60.0);
            let moved = rot.rotate_rect(rect, w, h);
            let (rw, rh) = rot.rotated_dims(100, 60);
            let back = rot.inverse().rotate_rect(moved, rw as f32, rh as f32);
            assert_eq!(back, rect, "rotation {rot:?}");
        }
    }

    #[test]
    fn test_rotate_rect_tracks_image_pixels() {
        // A single lit pixel must land inside the rotated rect of its cell.
        let (w, h) = (8u32, 5u32);
        let (px, py) = (6u32, 1u32);
        let mut img = RgbImage::new(w, h);
        img.put_pixel(px, py, Rgb([255, 255, 255]));
        let cell = FaceBox::new(px as f32, py as f32, px as f32 + 1.0, py as f32 + 1.0);

        for rot in [Rotation::Deg90, Rotation::Deg180, Rotation::Deg270] {
            let rotated = rot.apply(img.clone());
            let r = rot.rotate_rect(cell, w as f32, h as f32);
            assert_eq!(r.width(), 1.0);
            assert_eq!(r.height(), 1.0);
            let p = rotated.get_pixel(r.left as u32, r.top as u32);
            assert_eq!(p[0], 255, "rotation {rot:?} put pixel elsewhere");
        }
    }

    #[test]
    fn test_rotated_dims() {
        assert_eq!(Rotation::Deg90.rotated_dims(640, 480), (480, 640));
        assert_eq!(Rotation::Deg180.rotated_dims(640, 480), (640, 480));
    }
}
