//! Crate-level error type for the indexing and query paths.
//!
//! Component errors (tokenizer, chunker, embedder, index) are carried through
//! unchanged; [`Error::kind`] reports which of the caller-facing categories
//! an error belongs to.
use thiserror::Error;

use crate::chunker::ChunkError;
use crate::embedder::EmbedderError;
use crate::index::IndexError;
use crate::tokenizer::TokenizerError;

/// Caller-facing error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before any side effect; fix the input and retry.
    InvalidInput,
    /// A re-index of the same namespace is already running.
    Busy,
    /// The vector index storage could not be reached or failed.
    BackendUnavailable,
    /// Tokenizer or model failure.
    Internal,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("namespace busy: {0}")]
    Busy(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error(transparent)]
    Tokenizer(#[from] TokenizerError),

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    Embedder(#[from] EmbedderError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

impl Error {
    /// Category of this error, preserving the kind of wrapped component errors.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Busy(_) => ErrorKind::Busy,
            Self::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            Self::Tokenizer(_) => ErrorKind::Internal,
            Self::Chunk(ChunkError::InvalidConfig(_)) => ErrorKind::InvalidInput,
            Self::Chunk(ChunkError::Tokenizer(_)) => ErrorKind::Internal,
            Self::Embedder(EmbedderError::EmptyInput) => ErrorKind::InvalidInput,
            Self::Embedder(_) => ErrorKind::Internal,
            Self::Index(IndexError::InvalidInput(_) | IndexError::DimensionMismatch { .. }) => {
                ErrorKind::InvalidInput
            }
            Self::Index(IndexError::Backend(_)) => ErrorKind::BackendUnavailable,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_kinds_preserved() {
        let err: Error = EmbedderError::EmptyInput.into();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err: Error = ChunkError::InvalidConfig("overlap".into()).into();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err: Error = IndexError::Backend("disk gone".into()).into();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);

        let err: Error = IndexError::DimensionMismatch {
            expected: 384,
            actual: 3,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err: Error = EmbedderError::InferenceFailed("boom".into()).into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_display_is_transparent_for_components() {
        let err: Error = IndexError::InvalidInput("top_k must be positive".into()).into();
        assert_eq!(err.to_string(), "invalid input: top_k must be positive");
    }
}
