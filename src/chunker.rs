/// Token-window chunking with overlap.
///
/// Windows are fixed in tokens, not characters, so each chunk matches what
/// the embedding model sees. Consecutive windows start `chunk_size - overlap`
/// tokens apart; the last window is clipped to the sequence end.
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::tokenizer::{TextTokenizer, Token, TokenizerError};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_OVERLAP: usize = 50;

#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("invalid chunk configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Tokenizer(#[from] TokenizerError),
}

/// A contiguous token window of the source text.
///
/// `char_start`/`char_end` come from tokenizer offsets and are display
/// metadata only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub position: usize,
    pub text: String,
    pub token_start: usize,
    pub token_end: usize,
    pub char_start: usize,
    pub char_end: usize,
}

impl Chunk {
    #[must_use]
    pub fn token_count(&self) -> usize {
        self.token_end - self.token_start
    }
}

/// Validated sliding-window settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

impl Chunker {
    /// Fails when the window would never advance.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ChunkError> {
        if chunk_size == 0 {
            return Err(ChunkError::InvalidConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(ChunkError::InvalidConfig(format!(
                "overlap ({overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[must_use]
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    #[must_use]
    pub fn stride(&self) -> usize {
        self.chunk_size - self.overlap
    }

    /// Half-open `[start, end)` token windows for a sequence of `len` tokens.
    #[must_use]
    pub fn windows(&self, len: usize) -> Vec<(usize, usize)> {
        let mut windows = Vec::new();
        let mut start = 0;

        while start < len {
            let end = (start + self.chunk_size).min(len);
            windows.push((start, end));
            if end >= len {
                break;
            }
            start += self.stride();
        }

        windows
    }

    /// Split a token sequence into chunks, detokenizing each window.
    pub fn chunk(
        &self,
        tokens: &[Token],
        tokenizer: &dyn TextTokenizer,
    ) -> Result<Vec<Chunk>, ChunkError> {
        let windows = self.windows(tokens.len());
        let mut chunks = Vec::with_capacity(windows.len());

        for (position, (start, end)) in windows.into_iter().enumerate() {
            let span = &tokens[start..end];
            let text = tokenizer.detokenize(span)?;
            chunks.push(Chunk {
                position,
                text,
                token_start: start,
                token_end: end,
                char_start: span[0].char_start,
                char_end: span[span.len() - 1].char_end,
            });
        }

        debug!(
            "Chunked {} tokens into {} chunks (size={}, overlap={})",
            tokens.len(),
            chunks.len(),
            self.chunk_size,
            self.overlap
        );
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::WhitespaceTokenizer;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_rejects_non_advancing_stride() {
        assert!(matches!(
            Chunker::new(500, 600),
            Err(ChunkError::InvalidConfig(_))
        ));
        assert!(matches!(
            Chunker::new(500, 500),
            Err(ChunkError::InvalidConfig(_))
        ));
        assert!(matches!(Chunker::new(0, 0), Err(ChunkError::InvalidConfig(_))));
        assert!(Chunker::new(500, 499).is_ok());
    }

    #[test]
    fn test_defaults() {
        let chunker = Chunker::default();
        assert_eq!(chunker.chunk_size(), 500);
        assert_eq!(chunker.overlap(), 50);
        assert_eq!(chunker.stride(), 450);
    }

    #[test]
    fn test_empty_sequence() {
        let chunker = Chunker::default();
        assert!(chunker.windows(0).is_empty());
        let chunks = chunker.chunk(&[], &WhitespaceTokenizer).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_short_sequence_single_chunk() {
        let tokens = WhitespaceTokenizer.tokenize(&words(500)).unwrap();
        let chunks = Chunker::default()
            .chunk(&tokens, &WhitespaceTokenizer)
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].token_start, chunks[0].token_end), (0, 500));
    }

    #[test]
    fn test_window_bounds() {
        let chunker = Chunker::new(10, 2).unwrap();
        assert_eq!(chunker.windows(10), vec![(0, 10)]);
        assert_eq!(chunker.windows(11), vec![(0, 10), (8, 11)]);
        assert_eq!(chunker.windows(18), vec![(0, 10), (8, 18)]);
        assert_eq!(chunker.windows(19), vec![(0, 10), (8, 18), (16, 19)]);
    }

    #[test]
    fn test_windows_cover_sequence_exactly() {
        for &(size, overlap) in &[(10, 2), (7, 0), (5, 4), (500, 50)] {
            let chunker = Chunker::new(size, overlap).unwrap();
            for len in 1..1200 {
                let windows = chunker.windows(len);
                assert_eq!(windows[0].0, 0);
                assert_eq!(windows.last().unwrap().1, len, "len={len}");

                for (start, end) in &windows {
                    assert!(start < end);
                    assert!(end - start <= size);
                }
                for pair in windows.windows(2) {
                    let (a, b) = (pair[0], pair[1]);
                    assert_eq!(b.0, a.0 + chunker.stride());
                    assert!(b.1 >= a.1);
                    // Every window but the last is full, so the shared span is the overlap.
                    assert_eq!(a.1 - b.0, overlap.min(len - b.0));
                }
            }
        }
    }

    #[test]
    fn test_chunk_metadata() {
        let text = words(22);
        let tokens = WhitespaceTokenizer.tokenize(&text).unwrap();
        let chunks = Chunker::new(10, 3)
            .unwrap()
            .chunk(&tokens, &WhitespaceTokenizer)
            .unwrap();

        assert_eq!(chunks.len(), 3);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.position, i);
            assert!(!chunk.text.is_empty());
        }
        assert_eq!(chunks[1].token_start, 7);
        assert!(chunks[1].text.starts_with("w7 "));
        assert_eq!((chunks[2].token_start, chunks[2].token_end), (14, 22));
        assert_eq!(chunks[2].token_count(), 8);
        assert_eq!(&text[chunks[0].char_start..chunks[0].char_end], chunks[0].text);
    }

    #[test]
    fn test_retokenize_stays_within_window() {
        let text = "Overlap keeps ideas that straddle a boundary intact. ".repeat(40);
        let tokens = WhitespaceTokenizer.tokenize(&text).unwrap();
        let chunker = Chunker::new(32, 8).unwrap();

        for chunk in chunker.chunk(&tokens, &WhitespaceTokenizer).unwrap() {
            let again = WhitespaceTokenizer.tokenize(&chunk.text).unwrap();
            assert!(!again.is_empty());
            assert!(again.len() <= chunker.chunk_size());
            assert_eq!(again.len(), chunk.token_count());
        }
    }
}
