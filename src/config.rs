/// Configuration module for pagerag.
///
/// Handles loading, validating, and providing default configuration values,
/// and builds the pipeline components the configuration selects.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::chunker::{Chunker, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};
use crate::embedder::Embedder;
use crate::embedder::download::{all_files_present, default_model_dir, download_model_files};
use crate::embedder::mock::MockEmbedder;
use crate::embedder::onnx::OnnxEmbedder;
use crate::index::{DEFAULT_UPSERT_BATCH_SIZE, MemoryIndex, SqliteIndex, VectorIndex};
use crate::retrieval::{DEFAULT_EMBED_BATCH_SIZE, Retriever};
use crate::tokenizer::{HfTokenizer, TextTokenizer, WhitespaceTokenizer};

// ── Default value functions ──────────────────────────────────────────

fn default_db_path() -> String {
    "./pagerag.db".to_string()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    DEFAULT_OVERLAP
}

fn default_search_top_k() -> usize {
    5
}

fn default_embed_batch_size() -> usize {
    DEFAULT_EMBED_BATCH_SIZE
}

fn default_upsert_batch_size() -> usize {
    DEFAULT_UPSERT_BATCH_SIZE
}

fn default_model_name() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_model_path() -> String {
    default_model_dir().to_string_lossy().into_owned()
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default = "default_search_top_k")]
    pub search_top_k: usize,

    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub tokenizer: TokenizerConfig,

    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexConfig {
    #[serde(default)]
    pub backend: IndexBackend,

    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    #[default]
    Onnx,
    Mock,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    #[serde(default = "default_model_path")]
    pub dir: String,

    #[serde(default)]
    pub embedder: EmbedderKind,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerKind {
    /// The embedding model's own WordPiece vocabulary.
    #[default]
    Model,
    Whitespace,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct TokenizerConfig {
    #[serde(default)]
    pub kind: TokenizerKind,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            search_top_k: default_search_top_k(),
            embed_batch_size: default_embed_batch_size(),
            index: IndexConfig::default(),
            model: ModelConfig::default(),
            tokenizer: TokenizerConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::default(),
            upsert_batch_size: default_upsert_batch_size(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            dimensions: default_dimensions(),
            dir: default_model_path(),
            embedder: EmbedderKind::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"config.json"`.
    /// If the file does not exist, returns a default config and optionally
    /// generates a template file.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "config.json"
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            // Generate template only for the default path
            if path == "config.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.chunk_size > 0, "chunk_size must be positive");
        anyhow::ensure!(
            self.chunk_overlap < self.chunk_size,
            "chunk_overlap must be smaller than chunk_size"
        );
        anyhow::ensure!(self.search_top_k > 0, "search_top_k must be positive");
        anyhow::ensure!(
            self.embed_batch_size > 0,
            "embed_batch_size must be positive"
        );
        anyhow::ensure!(
            self.index.upsert_batch_size > 0,
            "index.upsert_batch_size must be positive"
        );
        anyhow::ensure!(
            self.model.dimensions > 0,
            "model.dimensions must be positive"
        );
        anyhow::ensure!(
            self.http.fetch_timeout_secs > 0,
            "http.fetch_timeout_secs must be positive"
        );
        Ok(())
    }

    #[must_use]
    pub fn model_dir(&self) -> PathBuf {
        PathBuf::from(&self.model.dir)
    }

    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.http.fetch_timeout_secs)
    }

    /// Whether the selected tokenizer or embedder needs the model files.
    #[must_use]
    pub fn needs_model_files(&self) -> bool {
        self.model.embedder == EmbedderKind::Onnx || self.tokenizer.kind == TokenizerKind::Model
    }

    pub fn chunker(&self) -> Result<Chunker> {
        Chunker::new(self.chunk_size, self.chunk_overlap).context("invalid chunk settings")
    }

    pub fn build_tokenizer(&self) -> Result<Arc<dyn TextTokenizer>> {
        Ok(match self.tokenizer.kind {
            TokenizerKind::Model => Arc::new(
                HfTokenizer::from_model_dir(&self.model_dir())
                    .context("failed to load model tokenizer")?,
            ),
            TokenizerKind::Whitespace => Arc::new(WhitespaceTokenizer),
        })
    }

    pub fn build_embedder(&self) -> Result<Arc<dyn Embedder>> {
        Ok(match self.model.embedder {
            EmbedderKind::Onnx => Arc::new(
                OnnxEmbedder::new(&self.model_dir(), &self.model.name, self.model.dimensions)
                    .context("failed to load ONNX embedder")?,
            ),
            EmbedderKind::Mock => {
                warn!("Using mock embedder: results are lexical, not semantic");
                Arc::new(MockEmbedder::new(self.model.dimensions))
            }
        })
    }

    pub fn build_index(&self, model_id: &str) -> Result<Arc<dyn VectorIndex>> {
        Ok(match self.index.backend {
            IndexBackend::Sqlite => Arc::new(
                SqliteIndex::open(&self.db_path, model_id, self.model.dimensions)
                    .with_context(|| format!("failed to open index database: {}", self.db_path))?
                    .with_upsert_batch_size(self.index.upsert_batch_size),
            ),
            IndexBackend::Memory => Arc::new(MemoryIndex::new(self.model.dimensions)),
        })
    }

    /// Build the full pipeline, downloading model files first if needed.
    ///
    /// Performs blocking I/O; call from a blocking context.
    pub fn build_retriever(&self) -> Result<Retriever> {
        self.validate()?;

        if self.needs_model_files() && !all_files_present(&self.model_dir()) {
            download_model_files(&self.model_dir())?;
        }

        let tokenizer = self.build_tokenizer()?;
        let embedder = self.build_embedder()?;
        let index = self.build_index(embedder.model_id())?;

        let retriever = Retriever::new(tokenizer, embedder, index, self.chunker()?)
            .context("failed to assemble retriever")?
            .with_embed_batch_size(self.embed_batch_size);
        Ok(retriever)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
