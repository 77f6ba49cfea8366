//! Async application layer shared by the HTTP and MCP surfaces.
//!
//! Runs the synchronous retrieval core on the blocking pool and shapes its
//! output into the response types both surfaces return.
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::error::{Error, ErrorKind};
use crate::index::IndexStats;
use crate::page::{PageError, fetch_page, namespace_for_url};
use crate::retrieval::{IndexReport, Retriever, SearchResult};

/// Longest accepted query, in characters.
pub const MAX_QUERY_CHARS: usize = 500;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] Error),

    #[error(transparent)]
    Page(#[from] PageError),

    #[error("background task failed: {0}")]
    Task(String),
}

impl AppError {
    /// Kind of the underlying core error, if there is one.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Core(e) => Some(e.kind()),
            _ => None,
        }
    }
}

/// One ranked chunk as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkView {
    pub chunk_index: usize,
    pub score: f32,
    pub text: String,
    pub start_token: usize,
    pub end_token: usize,
    pub token_count: usize,
    pub char_start: usize,
    pub char_end: usize,
}

impl From<SearchResult> for ChunkView {
    fn from(result: SearchResult) -> Self {
        let token_count = result.chunk.token_count();
        let chunk = result.chunk;
        Self {
            chunk_index: chunk.position,
            score: result.score,
            text: chunk.text,
            start_token: chunk.token_start,
            end_token: chunk.token_end,
            token_count,
            char_start: chunk.char_start,
            char_end: chunk.char_end,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchPageResponse {
    pub url: String,
    pub title: String,
    pub query: String,
    pub namespace: String,
    pub total_chunks: usize,
    pub results: Vec<ChunkView>,
    pub processing_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexResponse {
    pub namespace: String,
    pub total_chunks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub namespace: String,
    pub query: String,
    pub results: Vec<ChunkView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    pub namespace: String,
    pub deleted: bool,
}

/// Shared state behind every request handler.
#[derive(Clone)]
pub struct AppContext {
    pub retriever: Arc<Retriever>,
    pub client: reqwest::Client,
    pub default_top_k: usize,
}

impl AppContext {
    pub fn new(retriever: Arc<Retriever>, client: reqwest::Client, default_top_k: usize) -> Self {
        Self {
            retriever,
            client,
            default_top_k,
        }
    }

    /// Fetch a page, re-index it under its URL namespace, then query it.
    pub async fn search_page(
        &self,
        url: &str,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<SearchPageResponse, AppError> {
        let started = Instant::now();
        let query = validate_query(query)?;
        let top_k = top_k.unwrap_or(self.default_top_k);

        info!("Processing search request for URL: {url}");
        let page = fetch_page(&self.client, url).await?;
        let namespace = namespace_for_url(url);

        let (report, results) = {
            let retriever = Arc::clone(&self.retriever);
            let namespace = namespace.clone();
            let query = query.clone();
            blocking(move || -> Result<(IndexReport, Vec<SearchResult>), Error> {
                let report = retriever.index(&namespace, &page.text)?;
                let results = retriever.query(&namespace, &query, top_k)?;
                Ok((report, results))
            })
            .await?
        };

        info!(
            "Found {} results across {} chunks",
            results.len(),
            report.total_chunks
        );
        Ok(SearchPageResponse {
            url: page.url,
            title: page.title,
            query,
            namespace,
            total_chunks: report.total_chunks,
            results: results.into_iter().map(ChunkView::from).collect(),
            processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    pub async fn index_text(&self, namespace: &str, text: String) -> Result<IndexResponse, AppError> {
        let retriever = Arc::clone(&self.retriever);
        let ns = namespace.to_string();
        let report = blocking(move || retriever.index(&ns, &text)).await?;
        Ok(IndexResponse {
            namespace: namespace.to_string(),
            total_chunks: report.total_chunks,
        })
    }

    pub async fn query(
        &self,
        namespace: &str,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<QueryResponse, AppError> {
        let query = validate_query(query)?;
        let top_k = top_k.unwrap_or(self.default_top_k);

        let retriever = Arc::clone(&self.retriever);
        let (ns, q) = (namespace.to_string(), query.clone());
        let results = blocking(move || retriever.query(&ns, &q, top_k)).await?;

        Ok(QueryResponse {
            namespace: namespace.to_string(),
            query,
            results: results.into_iter().map(ChunkView::from).collect(),
        })
    }

    pub async fn delete(&self, namespace: &str) -> Result<DeleteResponse, AppError> {
        let retriever = Arc::clone(&self.retriever);
        let ns = namespace.to_string();
        let deleted = blocking(move || retriever.delete(&ns)).await?;
        Ok(DeleteResponse {
            namespace: namespace.to_string(),
            deleted,
        })
    }

    pub async fn stats(&self) -> Result<IndexStats, AppError> {
        let retriever = Arc::clone(&self.retriever);
        blocking(move || retriever.stats()).await
    }
}

fn validate_query(query: &str) -> Result<String, Error> {
    let query = query.trim();
    if query.is_empty() {
        return Err(Error::InvalidInput(
            "query cannot be empty or whitespace only".to_string(),
        ));
    }
    let chars = query.chars().count();
    if chars > MAX_QUERY_CHARS {
        return Err(Error::InvalidInput(format!(
            "query is {chars} characters, the limit is {MAX_QUERY_CHARS}"
        )));
    }
    Ok(query.to_string())
}

/// Run a core operation on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, Error> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Task(e.to_string()))?
        .map_err(AppError::from)
}
