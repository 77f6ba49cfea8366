//! Namespaced vector index.
//!
//! A namespace isolates the entries of one source page. Every backend scores
//! with cosine similarity over L2-normalized vectors and orders hits by score
//! descending, then `token_start` ascending, then id.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryIndex;
pub use sqlite::SqliteIndex;

/// Name of the similarity metric every backend uses.
pub const METRIC: &str = "cosine";

/// Rows per insert group when a backend writes in batches.
pub const DEFAULT_UPSERT_BATCH_SIZE: usize = 100;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for IndexError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Chunk metadata stored next to each vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub position: usize,
    pub text: String,
    pub token_start: usize,
    pub token_end: usize,
    pub char_start: usize,
    pub char_end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub payload: ChunkPayload,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub backend: &'static str,
    pub metric: &'static str,
    pub dimensions: usize,
    pub total_entries: usize,
    pub namespaces: BTreeMap<String, usize>,
}

/// Namespaced nearest-neighbour store.
///
/// Writes are atomic per call: a concurrent `search` observes either the
/// state before or after an `upsert`/`replace_namespace`, never a mix.
pub trait VectorIndex: Send + Sync {
    /// Short backend name for logs and stats.
    fn backend(&self) -> &'static str;

    /// Dimensionality every stored and query vector must have.
    fn dimensions(&self) -> usize;

    /// Insert entries, replacing any with the same id in `namespace`.
    fn upsert(&self, namespace: &str, entries: Vec<IndexEntry>) -> Result<(), IndexError>;

    /// Drop everything in `namespace` and store `entries` in its place.
    fn replace_namespace(&self, namespace: &str, entries: Vec<IndexEntry>)
    -> Result<(), IndexError>;

    /// Up to `top_k` nearest entries of `namespace`. Unknown namespaces are empty.
    fn search(
        &self,
        namespace: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, IndexError>;

    /// Remove a namespace. Returns whether it held any entries.
    fn delete_namespace(&self, namespace: &str) -> Result<bool, IndexError>;

    fn stats(&self) -> Result<IndexStats, IndexError>;
}

/// Shared argument checks for `search`.
pub(crate) fn check_query(query: &[f32], top_k: usize, dimensions: usize) -> Result<(), IndexError> {
    if top_k == 0 {
        return Err(IndexError::InvalidInput("top_k must be positive".to_string()));
    }
    check_vector(query, dimensions)
}

/// A stored or query vector must have the index's dimensionality and a
/// finite, non-zero norm; cosine similarity is undefined otherwise.
pub(crate) fn check_vector(vector: &[f32], dimensions: usize) -> Result<(), IndexError> {
    if vector.len() != dimensions {
        return Err(IndexError::DimensionMismatch {
            expected: dimensions,
            actual: vector.len(),
        });
    }

    let norm_sq: f32 = vector.iter().map(|v| v * v).sum();
    if !norm_sq.is_finite() || norm_sq <= f32::EPSILON {
        return Err(IndexError::InvalidInput(format!(
            "vector norm must be finite and non-zero, got squared norm {norm_sq}"
        )));
    }
    Ok(())
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Deterministic hit ordering shared by all backends.
pub(crate) fn rank(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.payload.token_start.cmp(&b.payload.token_start))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Collapse duplicate ids within one write, keeping the last occurrence.
pub(crate) fn dedup_last(entries: Vec<IndexEntry>) -> Vec<IndexEntry> {
    let mut seen = std::collections::HashSet::new();
    let mut kept: Vec<IndexEntry> = entries
        .into_iter()
        .rev()
        .filter(|e| seen.insert(e.id.clone()))
        .collect();
    kept.reverse();
    kept
}
