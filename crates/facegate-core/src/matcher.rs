use thiserror::Error;

use crate::types::Embedding;

/// Similarity at or above which two embeddings are the same identity.
pub const MATCH_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MatchError {
    #[error("embedding dimensions differ: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
}

/// Outcome of comparing a probe against an enrolled embedding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Cosine similarity in [-1, 1].
    pub similarity: f32,
}

/// Cosine similarity of two equal-length vectors; 0 when either has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, MatchError> {
    if a.len() != b.len() {
        return Err(MatchError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    // Rounding can push identical vectors a hair past 1.
    Ok((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0))
}

/// Strategy for deciding whether a probe matches an enrolled embedding.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, enrolled: &Embedding) -> Result<MatchResult, MatchError>;
}

/// Cosine similarity against [`MATCH_THRESHOLD`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, enrolled: &Embedding) -> Result<MatchResult, MatchError> {
        let similarity = cosine_similarity(probe.as_slice(), enrolled.as_slice())?;
        Ok(MatchResult {
            matched: similarity >= MATCH_THRESHOLD,
            similarity,
        })
    }
}
