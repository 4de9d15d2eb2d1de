use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::rotation::Rotation;

/// Face bounding box in edge form (pixel coordinates of the frame it came from).
///
/// Edges are not required to be ordered; detectors and mirrors can hand out
/// boxes with `right < left`. Use [`FaceBox::normalized`] before measuring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl FaceBox {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Return the same box with `left <= right` and `top <= bottom`.
    pub fn normalized(&self) -> Self {
        Self {
            left: self.left.min(self.right),
            top: self.top.min(self.bottom),
            right: self.left.max(self.right),
            bottom: self.top.max(self.bottom),
        }
    }

    pub fn width(&self) -> f32 {
        (self.right - self.left).abs()
    }

    pub fn height(&self) -> f32 {
        (self.bottom - self.top).abs()
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.left + self.right) / 2.0,
            (self.top + self.bottom) / 2.0,
        )
    }

    pub fn is_finite(&self) -> bool {
        self.left.is_finite()
            && self.top.is_finite()
            && self.right.is_finite()
            && self.bottom.is_finite()
    }
}

/// A single face reported by a detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: FaceBox,
    pub confidence: f32,
}

/// Which way the camera that produced the frames faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    Front,
    #[default]
    Back,
}

impl std::str::FromStr for CameraFacing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "front" => Ok(Self::Front),
            "back" | "rear" => Ok(Self::Back),
            other => Err(format!("unknown camera facing: {other}")),
        }
    }
}

/// The most recent face seen on the analysis stream.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceObservation {
    /// Box in analysis-frame pixel coordinates.
    pub bbox: FaceBox,
    /// Sensor rotation of the analysis frame.
    pub rotation: Rotation,
    pub frame_width: u32,
    pub frame_height: u32,
    pub observed_at: Instant,
}

impl FaceObservation {
    /// Whether the observation is recent enough to drive a capture.
    pub fn is_fresh(&self, max_age: std::time::Duration) -> bool {
        self.observed_at.elapsed() <= max_age
    }
}

/// Face embedding vector. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}
