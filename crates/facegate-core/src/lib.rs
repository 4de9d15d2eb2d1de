//! facegate-core: face geometry, embedding and matching.
//!
//! Detection runs SCRFD and embedding runs a FaceNet-style model, both via
//! ONNX Runtime on the CPU. Everything between the detector box and the
//! stored vector (rotation, mapping, cropping, persistence, comparison) is
//! plain image and slice arithmetic.

pub mod crop;
pub mod detector;
pub mod embedder;
pub mod mapper;
pub mod matcher;
pub mod rotation;
pub mod store;
pub mod types;

pub use crop::{CropError, FaceCropper};
pub use detector::{DetectorError, FaceDetector, ScrfdDetector};
pub use embedder::{Embedder, EmbedderError, EmbeddingModel, OnnxEmbeddingModel, TensorLayout};
pub use mapper::{AlignedRegion, CoordinateMapper, MapError, TargetFrame};
pub use matcher::{CosineMatcher, MatchError, MatchResult, Matcher, MATCH_THRESHOLD};
pub use rotation::{Rotation, RotationError};
pub use store::{EmbeddingStore, StoreError};
pub use types::{CameraFacing, Detection, Embedding, FaceBox, FaceObservation};
