//! Face embedding extraction.
//!
//! [`Embedder`] owns preprocessing and validation; the runtime behind it is any
//! [`EmbeddingModel`]. [`OnnxEmbeddingModel`] runs FaceNet/ArcFace-style ONNX
//! exports through ONNX Runtime and reads its input size and output
//! dimensionality from the model's declared tensor shapes.

use image::{imageops, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::{TensorRef, ValueType};
use std::path::Path;
use thiserror::Error;

use crate::types::Embedding;

const EMBEDDER_MEAN: f32 = 127.5;
const EMBEDDER_STD: f32 = 127.5;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("unsupported model shape: {0}")]
    UnsupportedShape(String),
    #[error("face image has zero area: {width}x{height}")]
    EmptyInput { width: u32, height: u32 },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("expected {expected}-dim embedding, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Memory layout of the model's image input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// `[1, 3, S, S]` (ONNX exports of ArcFace and most PyTorch models)
    Nchw,
    /// `[1, S, S, 3]` (TensorFlow FaceNet conversions)
    Nhwc,
}

/// Input/output contract of the inference runtime.
pub trait EmbeddingModel {
    /// Side length of the square image input.
    fn input_size(&self) -> u32;
    fn layout(&self) -> TensorLayout;
    /// Length `D` of the `[1, D]` output.
    fn output_dim(&self) -> usize;
    fn infer(&mut self, input: &Array4<f32>) -> Result<Vec<f32>, EmbedderError>;
}

/// ONNX Runtime embedding model.
pub struct OnnxEmbeddingModel {
    session: Session,
    input_size: u32,
    layout: TensorLayout,
    output_dim: usize,
}

impl OnnxEmbeddingModel {
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(4)?
            .commit_from_file(model_path)?;

        let input_shape = session
            .inputs()
            .first()
            .and_then(|i| tensor_shape(i.dtype()))
            .ok_or_else(|| EmbedderError::UnsupportedShape("model has no tensor input".into()))?;
        let output_shape = session
            .outputs()
            .first()
            .and_then(|o| tensor_shape(o.dtype()))
            .ok_or_else(|| EmbedderError::UnsupportedShape("model has no tensor output".into()))?;

        let (layout, input_size) = input_geometry(&input_shape)?;
        let output_dim = output_dimension(&output_shape)?;

        tracing::info!(
            path = model_path,
            ?input_shape,
            ?output_shape,
            ?layout,
            input_size,
            output_dim,
            "loaded embedding model"
        );

        Ok(Self {
            session,
            input_size,
            layout,
            output_dim,
        })
    }
}

impl EmbeddingModel for OnnxEmbeddingModel {
    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn layout(&self) -> TensorLayout {
        self.layout
    }

    fn output_dim(&self) -> usize {
        self.output_dim
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Vec<f32>, EmbedderError> {
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        Ok(raw.to_vec())
    }
}

fn tensor_shape(value_type: &ValueType) -> Option<Vec<i64>> {
    match value_type {
        ValueType::Tensor { shape, .. } => Some(shape.iter().copied().collect()),
        _ => None,
    }
}

/// Work out layout and square side length from a 4-D image input shape.
/// The batch dimension may be dynamic; spatial dimensions may not.
fn input_geometry(shape: &[i64]) -> Result<(TensorLayout, u32), EmbedderError> {
    let unsupported = || EmbedderError::UnsupportedShape(format!("input {shape:?}"));
    if shape.len() != 4 {
        return Err(unsupported());
    }
    let (layout, h, w) = match (shape[1], shape[3]) {
        (3, _) => (TensorLayout::Nchw, shape[2], shape[3]),
        (_, 3) => (TensorLayout::Nhwc, shape[1], shape[2]),
        _ => return Err(unsupported()),
    };
    if h <= 0 || h != w {
        return Err(unsupported());
    }
    let size = u32::try_from(h).map_err(|_| unsupported())?;
    Ok((layout, size))
}

/// Read `D` from a `[1, D]` output shape (batch may be dynamic).
fn output_dimension(shape: &[i64]) -> Result<usize, EmbedderError> {
    match shape {
        [batch, d] if (*batch == 1 || *batch < 0) && *d > 0 => Ok(*d as usize),
        _ => Err(EmbedderError::UnsupportedShape(format!("output {shape:?}"))),
    }
}

/// Converts cropped face images into embeddings of a fixed dimensionality.
pub struct Embedder<M> {
    model: M,
}

impl<M: EmbeddingModel> Embedder<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    /// Dimensionality of every embedding this embedder produces.
    pub fn dimension(&self) -> usize {
        self.model.output_dim()
    }

    pub fn embed(&mut self, face: &RgbImage) -> Result<Embedding, EmbedderError> {
        let (width, height) = face.dimensions();
        if width == 0 || height == 0 {
            return Err(EmbedderError::EmptyInput { width, height });
        }

        let input = preprocess(face, self.model.input_size(), self.model.layout());
        let values = self.model.infer(&input)?;

        let expected = self.model.output_dim();
        if values.len() != expected {
            return Err(EmbedderError::DimensionMismatch {
                expected,
                actual: values.len(),
            });
        }

        tracing::debug!(dimension = expected, "embedding extracted");
        Ok(values.into())
    }
}

/// Bilinear resize to `size` x `size`, then `(v - 127.5) / 127.5` per channel.
pub fn preprocess(face: &RgbImage, size: u32, layout: TensorLayout) -> Array4<f32> {
    let resized = imageops::resize(face, size, size, imageops::FilterType::Triangle);
    let s = size as usize;
    let mut tensor = match layout {
        TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, s, s)),
        TensorLayout::Nhwc => Array4::<f32>::zeros((1, s, s, 3)),
    };

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let normalized = (pixel[c] as f32 - EMBEDDER_MEAN) / EMBEDDER_STD;
            match layout {
                TensorLayout::Nchw => tensor[[0, c, y, x]] = normalized,
                TensorLayout::Nhwc => tensor[[0, y, x, c]] = normalized,
            }
        }
    }

    tensor
}
