//! Retrieval coordinator.
//!
//! Indexing path: tokenize, chunk, embed in parallel batches, then replace the
//! namespace in one step. Query path: embed the query, search the namespace,
//! and return ranked chunks.
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::chunker::{Chunk, Chunker};
use crate::embedder::{Embedder, EmbedderError};
use crate::error::{Error, Result};
use crate::index::{ChunkPayload, IndexEntry, IndexStats, SearchHit, VectorIndex};
use crate::tokenizer::TextTokenizer;

/// Texts per `embed_batch` call when none is configured.
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub total_chunks: usize,
}

/// A ranked chunk returned by [`Retriever::query`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub chunk: Chunk,
    pub score: f32,
}

impl From<SearchHit> for SearchResult {
    fn from(hit: SearchHit) -> Self {
        let p = hit.payload;
        Self {
            id: hit.id,
            chunk: Chunk {
                position: p.position,
                text: p.text,
                token_start: p.token_start,
                token_end: p.token_end,
                char_start: p.char_start,
                char_end: p.char_end,
            },
            score: hit.score,
        }
    }
}

/// Stable id of the entry for the chunk starting at `token_start`.
#[must_use]
pub fn entry_id(namespace: &str, token_start: usize) -> String {
    format!("{namespace}#{token_start}")
}

/// Owns one tokenizer, one embedder and one index, and wires them together.
pub struct Retriever {
    tokenizer: Arc<dyn TextTokenizer>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    chunker: Chunker,
    embed_batch_size: usize,
    in_flight: Mutex<HashSet<String>>,
}

/// Marks a namespace as being re-indexed until dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    namespace: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.namespace);
        }
    }
}

impl Retriever {
    /// Fails when the embedder and the index disagree on dimensionality.
    pub fn new(
        tokenizer: Arc<dyn TextTokenizer>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        chunker: Chunker,
    ) -> Result<Self> {
        if embedder.dimensions() != index.dimensions() {
            return Err(Error::InvalidInput(format!(
                "embedder {} produces {} dimensions but the {} index holds {}",
                embedder.model_id(),
                embedder.dimensions(),
                index.backend(),
                index.dimensions()
            )));
        }

        info!(
            "Retriever ready (model={}, index={}, chunk_size={}, overlap={})",
            embedder.model_id(),
            index.backend(),
            chunker.chunk_size(),
            chunker.overlap()
        );

        Ok(Self {
            tokenizer,
            embedder,
            index,
            chunker,
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    #[must_use]
    pub fn with_embed_batch_size(mut self, batch_size: usize) -> Self {
        self.embed_batch_size = batch_size.max(1);
        self
    }

    /// Chunk, embed and store `raw_text`, replacing whatever `namespace` held.
    pub fn index(&self, namespace: &str, raw_text: &str) -> Result<IndexReport> {
        self.index_with(namespace, raw_text, self.chunker)
    }

    /// [`Retriever::index`] with per-call chunk settings.
    pub fn index_with(
        &self,
        namespace: &str,
        raw_text: &str,
        chunker: Chunker,
    ) -> Result<IndexReport> {
        if namespace.is_empty() {
            return Err(Error::InvalidInput("namespace must not be empty".to_string()));
        }
        let _guard = self.claim(namespace)?;

        let tokens = self.tokenizer.tokenize(raw_text)?;
        let chunks = chunker.chunk(&tokens, self.tokenizer.as_ref())?;

        if let Some(chunk) = chunks.iter().find(|c| c.text.trim().is_empty()) {
            return Err(Error::InvalidInput(format!(
                "chunk {} (tokens {}..{}) has no text to embed",
                chunk.position, chunk.token_start, chunk.token_end
            )));
        }

        let vectors = self.embed_chunks(&chunks)?;

        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry {
                id: entry_id(namespace, chunk.token_start),
                vector,
                payload: ChunkPayload {
                    position: chunk.position,
                    text: chunk.text,
                    token_start: chunk.token_start,
                    token_end: chunk.token_end,
                    char_start: chunk.char_start,
                    char_end: chunk.char_end,
                },
            })
            .collect();

        let total_chunks = entries.len();
        self.index.replace_namespace(namespace, entries)?;

        info!(
            "Indexed namespace {namespace}: {} tokens, {total_chunks} chunks",
            tokens.len()
        );
        Ok(IndexReport { total_chunks })
    }

    /// Top `top_k` chunks of `namespace` for `query`, best first.
    pub fn query(&self, namespace: &str, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidInput("query must not be empty".to_string()));
        }
        if top_k == 0 {
            return Err(Error::InvalidInput("top_k must be positive".to_string()));
        }

        let vector = self.embedder.embed(query)?;
        let hits = self.index.search(namespace, &vector, top_k)?;

        debug!("Query on {namespace} returned {} hits", hits.len());
        Ok(hits.into_iter().map(SearchResult::from).collect())
    }

    /// Drop a namespace. Returns whether it held anything.
    pub fn delete(&self, namespace: &str) -> Result<bool> {
        let _guard = self.claim(namespace)?;
        Ok(self.index.delete_namespace(namespace)?)
    }

    pub fn stats(&self) -> Result<IndexStats> {
        Ok(self.index.stats()?)
    }

    fn claim(&self, namespace: &str) -> Result<InFlight<'_>> {
        let mut set = self
            .in_flight
            .lock()
            .map_err(|e| Error::BackendUnavailable(format!("lock poisoned: {e}")))?;
        if !set.insert(namespace.to_string()) {
            return Err(Error::Busy(format!(
                "namespace {namespace} is already being re-indexed"
            )));
        }
        Ok(InFlight {
            set: &self.in_flight,
            namespace: namespace.to_string(),
        })
    }

    /// Embed every chunk, batches in parallel. Any batch failure aborts.
    fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();

        let batches: Vec<Vec<Vec<f32>>> = texts
            .par_chunks(self.embed_batch_size)
            .map(|batch| {
                debug!("Embedding batch of {}", batch.len());
                self.embedder.embed_batch(batch)
            })
            .collect::<std::result::Result<_, EmbedderError>>()?;

        let vectors: Vec<Vec<f32>> = batches.into_iter().flatten().collect();
        if vectors.len() != chunks.len() {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                vectors.len()
            ))
            .into());
        }
        Ok(vectors)
    }
}
