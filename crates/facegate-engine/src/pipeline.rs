//! Enrollment and verification flows.
//!
//! One attempt runs its stages strictly in order on the calling thread:
//! capture, map, crop, embed, then store or load and compare. Stage errors
//! are logged once here and folded into the outcome enums.

use std::path::PathBuf;

use facegate_core::{
    CameraFacing, CoordinateMapper, CosineMatcher, Embedder, Embedding, EmbeddingModel,
    EmbeddingStore, FaceCropper, FaceObservation, Matcher, Rotation, StoreError, TargetFrame,
};
use facegate_hw::{Frame, FrameError};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture unavailable: {0}")]
    Unavailable(String),
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
}

/// Produces one full-resolution frame per trigger.
pub trait CaptureSource: Send {
    fn capture(&mut self) -> Result<Frame, CaptureError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EnrollOutcome {
    Enrolled { dimension: usize },
    FaceNotDetected,
    FaceNotUsable,
    StoreFailed,
    /// Another enroll or verify was already running.
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VerifyOutcome {
    Match { similarity: f32 },
    NoMatch { similarity: f32 },
    FaceNotDetected,
    FaceNotUsable,
    NoEnrollment,
    Busy,
}

/// Why no embedding came out of a capture.
enum Rejection {
    NotDetected,
    NotUsable,
}

pub struct Pipeline<M> {
    capture: Box<dyn CaptureSource>,
    mapper: CoordinateMapper,
    cropper: FaceCropper,
    embedder: Embedder<M>,
    store: EmbeddingStore,
    matcher: CosineMatcher,
    facing: CameraFacing,
}

impl<M: EmbeddingModel> Pipeline<M> {
    /// The store under `data_dir` takes its dimensionality from the embedder.
    pub fn new(
        capture: Box<dyn CaptureSource>,
        embedder: Embedder<M>,
        data_dir: impl Into<PathBuf>,
        margin_px: f32,
        facing: CameraFacing,
    ) -> Result<Self, StoreError> {
        let store = EmbeddingStore::open(data_dir, embedder.dimension())?;
        Ok(Self {
            capture,
            mapper: CoordinateMapper::new(margin_px),
            cropper: FaceCropper,
            embedder,
            store,
            matcher: CosineMatcher,
            facing,
        })
    }

    pub fn store(&self) -> &EmbeddingStore {
        &self.store
    }

    pub fn enroll(&mut self, observation: Option<&FaceObservation>, slot: &str) -> EnrollOutcome {
        let Some(observation) = observation else {
            tracing::info!(slot, "enroll: no face observed");
            return EnrollOutcome::FaceNotDetected;
        };

        let embedding = match self.face_embedding(observation) {
            Ok(e) => e,
            Err(Rejection::NotDetected) => return EnrollOutcome::FaceNotDetected,
            Err(Rejection::NotUsable) => return EnrollOutcome::FaceNotUsable,
        };

        match self.store.save(slot, &embedding) {
            Ok(()) => {
                tracing::info!(slot, dimension = embedding.dimension(), "enroll: stored");
                EnrollOutcome::Enrolled {
                    dimension: embedding.dimension(),
                }
            }
            Err(e) => {
                tracing::warn!(slot, error = %e, "enroll: store write failed");
                EnrollOutcome::StoreFailed
            }
        }
    }

    pub fn verify(&mut self, observation: Option<&FaceObservation>, slot: &str) -> VerifyOutcome {
        let Some(observation) = observation else {
            tracing::info!(slot, "verify: no face observed");
            return VerifyOutcome::FaceNotDetected;
        };

        let probe = match self.face_embedding(observation) {
            Ok(e) => e,
            Err(Rejection::NotDetected) => return VerifyOutcome::FaceNotDetected,
            Err(Rejection::NotUsable) => return VerifyOutcome::FaceNotUsable,
        };

        let enrolled = match self.store.load(slot) {
            Ok(Some(e)) => e,
            Ok(None) => {
                tracing::info!(slot, "verify: no enrollment");
                return VerifyOutcome::NoEnrollment;
            }
            Err(e) => {
                tracing::warn!(slot, error = %e, "verify: store read failed");
                return VerifyOutcome::NoEnrollment;
            }
        };

        match self.matcher.compare(&probe, &enrolled) {
            Ok(r) => {
                tracing::info!(slot, similarity = r.similarity, matched = r.matched, "verify: compared");
                if r.matched {
                    VerifyOutcome::Match {
                        similarity: r.similarity,
                    }
                } else {
                    VerifyOutcome::NoMatch {
                        similarity: r.similarity,
                    }
                }
            }
            Err(e) => {
                tracing::warn!(slot, error = %e, "verify: stored record incompatible");
                VerifyOutcome::NoEnrollment
            }
        }
    }

    /// Capture, map, crop and embed the observed face.
    fn face_embedding(&mut self, observation: &FaceObservation) -> Result<Embedding, Rejection> {
        let frame = self.capture.capture().map_err(|e| {
            tracing::warn!(error = %e, "capture failed");
            Rejection::NotDetected
        })?;
        let capture_rotation = Rotation::from_degrees(frame.rotation_degrees).map_err(|e| {
            tracing::warn!(error = %e, sequence = frame.sequence, "capture frame rejected");
            Rejection::NotDetected
        })?;

        let target = TargetFrame {
            width: frame.width(),
            height: frame.height(),
            rotation: capture_rotation,
        };
        let region = self.mapper.map(observation, target, self.facing).map_err(|e| {
            tracing::warn!(error = %e, "face region unusable");
            Rejection::NotUsable
        })?;

        let image =
            CoordinateMapper::reconcile(frame.into_image(), capture_rotation, observation.rotation);
        let face = self.cropper.crop(image, &region).map_err(|e| {
            tracing::warn!(error = %e, "crop failed");
            Rejection::NotUsable
        })?;
        let upright = observation.rotation.apply(face);

        self.embedder.embed(&upright).map_err(|e| {
            tracing::warn!(error = %e, "embedding failed");
            Rejection::NotDetected
        })
    }
}
