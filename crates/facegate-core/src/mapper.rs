//! Analysis-to-capture coordinate mapping.
//!
//! The analysis stream and the capture path can disagree on resolution, aspect
//! ratio and sensor rotation at the same time, and a front camera's analysis
//! buffer is mirrored relative to its stills. [`CoordinateMapper::map`] applies
//! the corrections in a fixed order: rotation reconciliation, per-axis scale,
//! mirror, margin, then normalization and clamping.

use image::RgbImage;
use thiserror::Error;

use crate::rotation::Rotation;
use crate::types::{CameraFacing, FaceBox, FaceObservation};

#[derive(Error, Debug, PartialEq)]
pub enum MapError {
    #[error("frame has zero size: {width}x{height}")]
    ZeroSizedFrame { width: u32, height: u32 },
    #[error("face box has non-finite coordinates")]
    NonFiniteBox,
    #[error("mapped region is empty after clamping ({width}x{height})")]
    EmptyRegion { width: i64, height: i64 },
}

/// Clamped, non-empty rectangle inside a `bounds_width` x `bounds_height` image.
///
/// Only constructible through [`AlignedRegion::new`], which enforces both
/// properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignedRegion {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    bounds_width: u32,
    bounds_height: u32,
}

impl AlignedRegion {
    pub fn new(
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        bounds_width: u32,
        bounds_height: u32,
    ) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        let right = x.checked_add(width)?;
        let bottom = y.checked_add(height)?;
        if right > bounds_width || bottom > bounds_height {
            return None;
        }
        Some(Self {
            x,
            y,
            width,
            height,
            bounds_width,
            bounds_height,
        })
    }

    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Dimensions of the image this region was validated against.
    pub fn bounds(&self) -> (u32, u32) {
        (self.bounds_width, self.bounds_height)
    }

    /// Whether the region lies inside an image of the given size.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.right() <= width && self.bottom() <= height
    }
}

/// Geometry of the full-resolution capture frame as delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetFrame {
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CoordinateMapper {
    margin_px: f32,
}

impl CoordinateMapper {
    /// `margin_px` inflates every mapped box on all four sides. Negative
    /// values are treated as zero.
    pub fn new(margin_px: f32) -> Self {
        Self {
            margin_px: margin_px.max(0.0),
        }
    }

    pub fn margin_px(&self) -> f32 {
        self.margin_px
    }

    /// Bring a capture image into the analysis frame's orientation.
    ///
    /// Regions returned by [`map`](Self::map) address the image returned here.
    pub fn reconcile(
        image: RgbImage,
        capture_rotation: Rotation,
        analysis_rotation: Rotation,
    ) -> RgbImage {
        capture_rotation.relative_to(analysis_rotation).apply(image)
    }

    /// Map an analysis-frame observation into the reconciled capture frame.
    pub fn map(
        &self,
        observation: &FaceObservation,
        target: TargetFrame,
        facing: CameraFacing,
    ) -> Result<AlignedRegion, MapError> {
        if observation.frame_width == 0 || observation.frame_height == 0 {
            return Err(MapError::ZeroSizedFrame {
                width: observation.frame_width,
                height: observation.frame_height,
            });
        }
        if !observation.bbox.is_finite() {
            return Err(MapError::NonFiniteBox);
        }

        // 1. Rotation reconciliation
        let delta = target.rotation.relative_to(observation.rotation);
        let (width, height) = delta.rotated_dims(target.width, target.height);
        if width == 0 || height == 0 {
            return Err(MapError::ZeroSizedFrame { width, height });
        }
        let (w, h) = (width as f32, height as f32);

        // 2. Scale
        let sx = w / observation.frame_width as f32;
        let sy = h / observation.frame_height as f32;
        let b = observation.bbox;
        let mut mapped = FaceBox::new(b.left * sx, b.top * sy, b.right * sx, b.bottom * sy);

        // 3. Mirror
        if facing == CameraFacing::Front {
            mapped = FaceBox::new(w - mapped.right, mapped.top, w - mapped.left, mapped.bottom);
        }

        // 4. Margin (on the ordered box so inflation never shrinks it)
        let m = self.margin_px;
        let ordered = mapped.normalized();
        let inflated = FaceBox::new(
            ordered.left - m,
            ordered.top - m,
            ordered.right + m,
            ordered.bottom + m,
        );

        // 5. Normalize and clamp
        let n = inflated.normalized();
        let left = n.left.round().clamp(0.0, w) as i64;
        let top = n.top.round().clamp(0.0, h) as i64;
        let right = n.right.round().clamp(0.0, w) as i64;
        let bottom = n.bottom.round().clamp(0.0, h) as i64;
        let region_w = right - left;
        let region_h = bottom - top;

        tracing::debug!(
            ?delta,
            sx,
            sy,
            ?facing,
            left,
            top,
            right,
            bottom,
            "mapped observation into capture frame"
        );

        if region_w <= 0 || region_h <= 0 {
            return Err(MapError::EmptyRegion {
                width: region_w,
                height: region_h,
            });
        }

        AlignedRegion::new(
            left as u32,
            top as u32,
            region_w as u32,
            region_h as u32,
            width,
            height,
        )
        .ok_or(MapError::EmptyRegion {
            width: region_w,
            height: region_h,
        })
    }
}
