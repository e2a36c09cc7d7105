//! # Stage: Similarity Engine
//!
//! ## Responsibility
//! Turn text into a fixed-length vector through an [`EmbeddingProvider`] and
//! compare vectors by cosine similarity / distance.
//!
//! ## Guarantees
//! - Input longer than `max_input_chars` is cut on a char boundary, never rejected
//! - Cosine similarity is clamped to `[-1, 1]`; zero-magnitude vectors yield `0.0`, never NaN
//! - Vectors of different lengths are a [`SimilarityError::DimensionMismatch`]
//!
//! ## NOT Responsible For
//! - Deciding whether a distance is "too close" (that belongs to `editor`)
//! - Storing vectors (that belongs to `store`)

use crate::providers::{EmbeddingProvider, ProviderError};
use crate::OrchestratorError;
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors produced by vector comparison.
#[derive(Debug, Error, PartialEq)]
pub enum SimilarityError {
    /// The two vectors have different lengths.
    #[error("dimension mismatch: {left} vs {right}")]
    DimensionMismatch {
        /// Length of the first vector.
        left: usize,
        /// Length of the second vector.
        right: usize,
    },
}

/// Cosine similarity of two vectors, in `[-1, 1]`.
///
/// Returns `0.0` when either vector has zero magnitude.
///
/// # Errors
///
/// Returns [`SimilarityError::DimensionMismatch`] if the lengths differ.
///
/// # Panics
///
/// This function never panics.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    let mut dot = 0.0f64;
    let mut mag_a = 0.0f64;
    let mut mag_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }
    let mag_a = mag_a.sqrt();
    let mag_b = mag_b.sqrt();
    if mag_a < 1e-12 || mag_b < 1e-12 {
        return Ok(0.0);
    }
    Ok((dot / (mag_a * mag_b)).clamp(-1.0, 1.0))
}

/// `1 - cosine_similarity(a, b)`; lower means more similar.
///
/// # Errors
///
/// Returns [`SimilarityError::DimensionMismatch`] if the lengths differ.
pub fn distance(a: &[f32], b: &[f32]) -> Result<f64, SimilarityError> {
    cosine_similarity(a, b).map(|s| 1.0 - s)
}

/// Highest similarity between `candidate` and any vector in `window`.
///
/// An empty window yields `0.0` (nothing to be similar to).
///
/// # Errors
///
/// Returns [`SimilarityError::DimensionMismatch`] on the first vector whose
/// length differs from the candidate's.
pub fn max_similarity(candidate: &[f32], window: &[Vec<f32>]) -> Result<f64, SimilarityError> {
    let mut best: Option<f64> = None;
    for existing in window {
        let sim = cosine_similarity(candidate, existing)?;
        best = Some(best.map_or(sim, |b| b.max(sim)));
    }
    Ok(best.unwrap_or(0.0))
}

/// Cut `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_input(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Embeds text through a provider with input truncation and a dimension check.
#[derive(Clone)]
pub struct SimilarityEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    dimensions: usize,
    max_input_chars: usize,
}

impl SimilarityEngine {
    /// Create an engine over `embedder` producing `dimensions`-long vectors.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, dimensions: usize, max_input_chars: usize) -> Self {
        Self {
            embedder,
            dimensions,
            max_input_chars,
        }
    }

    /// Vector length every embedding must have.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed `text`, truncating it first.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::Provider`] if the provider fails.
    /// - [`OrchestratorError::Similarity`] if the provider returns a vector
    ///   of the wrong dimension.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, OrchestratorError> {
        let input = truncate_input(text, self.max_input_chars);
        if input.len() < text.len() {
            debug!(
                original_chars = text.chars().count(),
                kept_chars = self.max_input_chars,
                "embedding input truncated"
            );
        }
        let vector = self.embedder.embed(input).await?;
        if vector.len() != self.dimensions {
            return Err(SimilarityError::DimensionMismatch {
                left: vector.len(),
                right: self.dimensions,
            }
            .into());
        }
        Ok(vector)
    }
}

/// Deterministic pseudo-embedding provider.
///
/// Hashes each lowercase word and projects it through sin/cos, then
/// normalises to a unit vector. Texts sharing words land close together,
/// which is enough for offline runs and tests.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    /// Create an embedder producing `dimensions`-long vectors.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Synchronous embedding used by the provider impl.
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let dim = self.dimensions;
        let mut acc = vec![0.0f64; dim];
        if dim == 0 {
            return Vec::new();
        }
        for word in text.split_whitespace() {
            let word = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if word.is_empty() {
                continue;
            }
            let mut h = DefaultHasher::new();
            word.hash(&mut h);
            // xorshift64 seeded by the word hash spreads each word over every slot
            let mut state = h.finish() | 1;
            for (i, slot) in acc.iter_mut().enumerate() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                let angle = (state >> 11) as f64 / (1u64 << 53) as f64 * std::f64::consts::TAU;
                *slot += if i % 2 == 0 { angle.sin() } else { angle.cos() };
            }
        }
        let norm: f64 = acc.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 1e-9 {
            acc.iter_mut().for_each(|v| *v /= norm);
        }
        acc.into_iter().map(|v| v as f32).collect()
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        Ok(self.embed_sync(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical_vectors_returns_one() {
        let v = vec![1.0, 2.0, 3.0, 4.0];
        let sim = cosine_similarity(&v, &v).expect("test: same length");
        assert!((sim - 1.0).abs() < 1e-9, "got {sim}");
    }

    #[test]
    fn test_cosine_similarity_orthogonal_vectors_is_zero() {
        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).expect("test: same length");
        assert!(sim.abs() < 1e-9);
    }

    #[test]
    fn test_cosine_similarity_opposite_vectors_is_minus_one() {
        let sim = cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]).expect("test: same length");
        assert!((sim + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_similarity_zero_magnitude_returns_zero_not_nan() {
        let sim = cosine_similarity(&[0.0, 0.0, 0.0], &[1.0, 2.0, 3.0]).expect("test: same length");
        assert_eq!(sim, 0.0);
        assert!(!sim.is_nan());
    }

    #[test]
    fn test_cosine_similarity_dimension_mismatch_errors() {
        let err = cosine_similarity(&[1.0, 2.0], &[1.0]).unwrap_err();
        assert_eq!(err, SimilarityError::DimensionMismatch { left: 2, right: 1 });
    }

    #[test]
    fn test_distance_is_one_minus_similarity() {
        let d = distance(&[1.0, 0.0], &[0.0, 1.0]).expect("test: same length");
        assert!((d - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_max_similarity_empty_window_is_zero() {
        let sim = max_similarity(&[1.0, 0.0], &[]).expect("test: empty window");
        assert_eq!(sim, 0.0);
    }

    #[test]
    fn test_max_similarity_picks_closest() {
        let window = vec![vec![0.0, 1.0], vec![1.0, 0.1]];
        let sim = max_similarity(&[1.0, 0.0], &window).expect("test: same length");
        assert!(sim > 0.99);
    }

    #[test]
    fn test_truncate_input_respects_char_boundaries() {
        assert_eq!(truncate_input("héllo wörld", 4), "héll");
        assert_eq!(truncate_input("short", 100), "short");
        assert_eq!(truncate_input("", 3), "");
    }

    #[test]
    fn test_hash_embedder_is_deterministic_and_unit_length() {
        let e = HashEmbedder::new(64);
        let a = e.embed_sync("term life insurance for seniors");
        let b = e.embed_sync("term life insurance for seniors");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_hash_embedder_shared_words_are_closer() {
        let e = HashEmbedder::new(128);
        let base = e.embed_sync("best term life insurance for seniors");
        let near = e.embed_sync("best term life insurance for young families");
        let far = e.embed_sync("how to repair a bicycle chain");
        let near_sim = cosine_similarity(&base, &near).expect("test: same dim");
        let far_sim = cosine_similarity(&base, &far).expect("test: same dim");
        assert!(near_sim > far_sim, "near {near_sim} should beat far {far_sim}");
    }

    #[tokio::test]
    async fn test_engine_rejects_wrong_dimension() {
        let engine = SimilarityEngine::new(Arc::new(HashEmbedder::new(8)), 16, 100);
        let err = engine.embed("anything").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Similarity(_)));
    }

    #[tokio::test]
    async fn test_engine_truncates_long_input_silently() {
        let engine = SimilarityEngine::new(Arc::new(HashEmbedder::new(16)), 16, 5);
        let long = "word ".repeat(10_000);
        let truncated = engine.embed(&long).await.expect("test: long input accepted");
        let direct = HashEmbedder::new(16).embed_sync("word ");
        assert_eq!(truncated, direct);
    }
}
