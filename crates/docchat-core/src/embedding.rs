//! Embedding trait and vector utilities.
//!
//! Defines the [`Embedder`] trait that all embedding backends implement,
//! plus pure helper functions for vector serialization and similarity.
//!
//! Concrete providers (OpenAI, Ollama, fastembed, feature hashing) live
//! in the `docchat` app crate.

use async_trait::async_trait;

use crate::error::ServiceError;

/// Text → fixed-dimension vector.
///
/// Implementations must be deterministic for a fixed model and input, and
/// batching must not change results: embedding `[a, b]` yields the same
/// vectors as embedding `[a]` then `[b]`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"bge-small-en-v1.5"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError>;
}

/// Check that a provider returned one vector of the right size per input.
pub fn check_batch(
    expected_len: usize,
    dims: usize,
    vectors: &[Vec<f32>],
) -> Result<(), ServiceError> {
    if vectors.len() != expected_len {
        return Err(ServiceError::Terminal(format!(
            "embedding count mismatch: sent {} texts, got {} vectors",
            expected_len,
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(ServiceError::Terminal(format!(
            "embedding dimension mismatch: expected {}, got {}",
            dims,
            bad.len()
        )));
    }
    Ok(())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use docchat_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity, the index's fixed retrieval metric.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors
/// of different lengths, or zero vectors.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Scale a vector to unit L2 norm in place. Zero vectors are left as is.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let sim = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_cosine_matches_dot_of_normalized() {
        let mut a = vec![3.0, 4.0, 0.0];
        let mut b = vec![1.0, 2.0, 2.0];
        let cos = cosine_similarity(&a, &b);
        l2_normalize(&mut a);
        l2_normalize(&mut b);
        let dot: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        assert!((cos - dot).abs() < 1e-6);
    }

    #[test]
    fn test_check_batch_rejects_wrong_dims() {
        let err = check_batch(1, 3, &[vec![1.0, 2.0]]).unwrap_err();
        assert!(matches!(err, ServiceError::Terminal(_)));
        assert!(check_batch(2, 2, &[vec![1.0, 2.0], vec![0.0, 1.0]]).is_ok());
    }
}
