/// Mock embedder for testing purposes.
///
/// Hashes lowercase terms into fixed buckets weighted by term frequency, so
/// texts that share vocabulary land near each other. Deterministic and free
/// of model files.
use std::collections::BTreeMap;

use super::{Embedder, EmbedderError, l2_normalize};

/// A mock embedder that produces deterministic bag-of-words vectors.
///
/// Useful for testing without loading a real ONNX model.
pub struct MockEmbedder {
    pub dimensions: usize,
}

impl MockEmbedder {
    /// Create a new `MockEmbedder` with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// FNV-1a bucket for a term.
    fn bucket(term: &str, dims: usize) -> usize {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in term.as_bytes() {
            h ^= u64::from(*b);
            h = h.wrapping_mul(0x100000001b3);
        }
        (h % dims as u64) as usize
    }

    fn terms(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
            .collect()
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self { dimensions: 384 }
    }
}

impl Embedder for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let terms = Self::terms(text);
        if terms.is_empty() {
            return Err(EmbedderError::EmptyInput);
        }

        // BTreeMap keeps accumulation order fixed, so output is bit-for-bit stable.
        let mut tf: BTreeMap<&str, f32> = BTreeMap::new();
        for term in &terms {
            *tf.entry(term.as_str()).or_default() += 1.0;
        }

        let total = terms.len() as f32;
        let mut embedding = vec![0.0f32; self.dimensions];
        for (term, count) in tf {
            embedding[Self::bucket(term, self.dimensions)] += count / total;
        }

        Ok(l2_normalize(&embedding))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        "mock-hashing"
    }
}
