//! # pagerag: semantic search over a single web page
//!
//! Fetches a page, splits its text into overlapping token windows, embeds
//! each window, and answers natural-language queries with the most similar
//! windows. Served over HTTP, as MCP tools, or from the command line.
//!
//! ## Architecture
//!
//! - **[`tokenizer`]**: text ↔ tokens with character offsets
//! - **[`chunker`]**: sliding token windows with overlap
//! - **[`embedder`]**: text embedding via ONNX Runtime (all-MiniLM-L6-v2)
//! - **[`index`]**: namespaced vector index (in-memory or SQLite + sqlite-vec)
//! - **[`retrieval`]**: indexing and query coordinator
//! - **[`page`]**: page fetching and HTML cleaning
//! - **[`app`]**, **[`http`]**, **[`mcp`]**: async surfaces
//! - **[`config`]**: configuration loading and component wiring

pub mod app;
pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod http;
pub mod index;
pub mod mcp;
pub mod page;
pub mod retrieval;
pub mod tokenizer;

pub use error::{Error, ErrorKind, Result};
pub use retrieval::{IndexReport, Retriever, SearchResult};
