/// Tokenizer adapters used by the chunker.
///
/// `HfTokenizer` wraps the HuggingFace `tokenizers` crate so chunk windows
/// line up with the embedding model's own WordPiece vocabulary.
/// `WhitespaceTokenizer` is a dependency-free fallback used by tests and
/// offline runs.
use std::path::Path;

use thiserror::Error;
use tokenizers::Tokenizer;
use tracing::debug;

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("tokenizer load failed: {0}")]
    LoadFailed(String),

    #[error("tokenization failed: {0}")]
    EncodeFailed(String),

    #[error("detokenization failed: {0}")]
    DecodeFailed(String),
}

/// One sub-word (or word) token with its character span in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub id: u32,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
}

/// Text → tokens → text.
///
/// Implementations must be deterministic and must accept input of any
/// length; empty input yields an empty sequence.
pub trait TextTokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Result<Vec<Token>, TokenizerError>;

    /// Reconstruct display text for a contiguous token span.
    fn detokenize(&self, tokens: &[Token]) -> Result<String, TokenizerError>;
}

/// WordPiece marker for a piece that continues the previous word.
const CONTINUATION_PREFIX: &str = "##";

/// HuggingFace tokenizer loaded from a model's `tokenizer.json`.
pub struct HfTokenizer {
    inner: Tokenizer,
}

impl HfTokenizer {
    /// Load `tokenizer.json` from the model directory.
    ///
    /// Truncation and padding configured in the file are switched off; window
    /// sizing is the chunker's job.
    pub fn from_model_dir(model_dir: &Path) -> Result<Self, TokenizerError> {
        let tokenizer_path = model_dir.join("tokenizer.json");
        if !tokenizer_path.exists() {
            return Err(TokenizerError::LoadFailed(format!(
                "tokenizer.json not found in {}",
                model_dir.display()
            )));
        }

        let mut inner = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| TokenizerError::LoadFailed(e.to_string()))?;
        inner
            .with_truncation(None)
            .map_err(|e| TokenizerError::LoadFailed(e.to_string()))?;
        inner.with_padding(None);

        Ok(Self { inner })
    }
}

impl TextTokenizer for HfTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<Token>, TokenizerError> {
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let encoding = self
            .inner
            .encode_char_offsets(text, false)
            .map_err(|e| TokenizerError::EncodeFailed(e.to_string()))?;

        let tokens: Vec<Token> = encoding
            .get_ids()
            .iter()
            .zip(encoding.get_tokens())
            .zip(encoding.get_offsets())
            .map(|((&id, piece), &(char_start, char_end))| Token {
                id,
                text: piece.clone(),
                char_start,
                char_end,
            })
            .collect();

        debug!("Tokenized {} chars into {} tokens", text.len(), tokens.len());
        Ok(tokens)
    }

    /// A span that starts inside a word decodes from the next word start; the
    /// cut-off pieces belong to the previous window's overlap. A span made
    /// only of continuation pieces decodes to the bare fragment.
    fn detokenize(&self, tokens: &[Token]) -> Result<String, TokenizerError> {
        let lead = tokens
            .iter()
            .take_while(|t| t.text.starts_with(CONTINUATION_PREFIX))
            .count();
        let span = if lead < tokens.len() { &tokens[lead..] } else { tokens };

        let ids: Vec<u32> = span.iter().map(|t| t.id).collect();
        let text = self
            .inner
            .decode(&ids, true)
            .map_err(|e| TokenizerError::DecodeFailed(e.to_string()))?;

        Ok(match text.strip_prefix(CONTINUATION_PREFIX) {
            Some(fragment) => fragment.to_string(),
            None => text,
        })
    }
}

/// Splits on Unicode whitespace; tokens carry their ordinal as `id`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceTokenizer;

impl TextTokenizer for WhitespaceTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<Token>, TokenizerError> {
        let mut tokens = Vec::new();
        // (byte offset, char offset) of the word being scanned
        let mut word_start: Option<(usize, usize)> = None;
        let mut char_count = 0;

        for (char_idx, (byte_idx, ch)) in text.char_indices().enumerate() {
            char_count = char_idx + 1;
            if ch.is_whitespace() {
                if let Some((start_byte, start_char)) = word_start.take() {
                    tokens.push(Token {
                        id: tokens.len() as u32,
                        text: text[start_byte..byte_idx].to_string(),
                        char_start: start_char,
                        char_end: char_idx,
                    });
                }
            } else if word_start.is_none() {
                word_start = Some((byte_idx, char_idx));
            }
        }

        if let Some((start_byte, start_char)) = word_start {
            tokens.push(Token {
                id: tokens.len() as u32,
                text: text[start_byte..].to_string(),
                char_start: start_char,
                char_end: char_count,
            });
        }

        Ok(tokens)
    }

    fn detokenize(&self, tokens: &[Token]) -> Result<String, TokenizerError> {
        let words: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        Ok(words.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunker;

    #[test]
    fn test_whitespace_empty() {
        let tokens = WhitespaceTokenizer.tokenize("").unwrap();
        assert!(tokens.is_empty());
        let tokens = WhitespaceTokenizer.tokenize("   \n\t ").unwrap();
        assert!(tokens.is_empty());
    }

    #[test]
    fn test_whitespace_offsets() {
        let tokens = WhitespaceTokenizer.tokenize("  héllo wörld\nagain").unwrap();
        let words: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(words, vec!["héllo", "wörld", "again"]);

        assert_eq!((tokens[0].char_start, tokens[0].char_end), (2, 7));
        assert_eq!((tokens[1].char_start, tokens[1].char_end), (8, 13));
        assert_eq!((tokens[2].char_start, tokens[2].char_end), (14, 19));
        assert_eq!(tokens[2].id, 2);
    }

    #[test]
    fn test_whitespace_detokenize_joins() {
        let tokens = WhitespaceTokenizer.tokenize("a  b\n\nc").unwrap();
        assert_eq!(WhitespaceTokenizer.detokenize(&tokens).unwrap(), "a b c");
        assert_eq!(WhitespaceTokenizer.detokenize(&[]).unwrap(), "");
    }

    #[test]
    fn test_whitespace_deterministic() {
        let text = "The same text always yields the same tokens.";
        let a = WhitespaceTokenizer.tokenize(text).unwrap();
        let b = WhitespaceTokenizer.tokenize(text).unwrap();
        assert_eq!(a, b);
    }

    /// Minimal BERT-style WordPiece tokenizer, same layout as the model's.
    fn write_wordpiece_tokenizer(dir: &Path) {
        let vocab = [
            "[PAD]", "[UNK]", "[CLS]", "[SEP]", "neural", "network", "##s", "learn", "##ing",
            "deep", "model", ".", "the", "##er", ",",
        ];
        let vocab: serde_json::Map<String, serde_json::Value> = vocab
            .iter()
            .enumerate()
            .map(|(id, piece)| (piece.to_string(), serde_json::json!(id)))
            .collect();
        let special = |id: usize, content: &str| {
            serde_json::json!({
                "id": id, "content": content, "single_word": false, "lstrip": false,
                "rstrip": false, "normalized": false, "special": true
            })
        };

        let tokenizer = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [
                special(0, "[PAD]"),
                special(1, "[UNK]"),
                special(2, "[CLS]"),
                special(3, "[SEP]")
            ],
            "normalizer": {
                "type": "BertNormalizer", "clean_text": true, "handle_chinese_chars": true,
                "strip_accents": null, "lowercase": true
            },
            "pre_tokenizer": { "type": "BertPreTokenizer" },
            "post_processor": null,
            "decoder": { "type": "WordPiece", "prefix": "##", "cleanup": true },
            "model": {
                "type": "WordPiece", "unk_token": "[UNK]", "continuing_subword_prefix": "##",
                "max_input_chars_per_word": 100, "vocab": vocab
            }
        });
        std::fs::write(
            dir.join("tokenizer.json"),
            serde_json::to_string_pretty(&tokenizer).unwrap(),
        )
        .unwrap();
    }

    const WORDPIECE_TEXT: &str = "Neural networks, deep learning. The learner models networks.";

    #[test]
    fn test_hf_tokenizer_wordpiece_pieces_and_offsets() {
        let dir = tempfile::tempdir().unwrap();
        write_wordpiece_tokenizer(dir.path());
        let tokenizer = HfTokenizer::from_model_dir(dir.path()).unwrap();

        let tokens = tokenizer.tokenize(WORDPIECE_TEXT).unwrap();
        let pieces: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(
            pieces,
            vec![
                "neural", "network", "##s", ",", "deep", "learn", "##ing", ".", "the", "learn",
                "##er", "model", "##s", "network", "##s", "."
            ]
        );

        // Offsets index the original (cased) text.
        assert_eq!((tokens[1].char_start, tokens[1].char_end), (7, 14));
        assert_eq!((tokens[2].char_start, tokens[2].char_end), (14, 15));
        assert_eq!((tokens[15].char_start, tokens[15].char_end), (59, 60));

        assert_eq!(
            tokenizer.detokenize(&tokens).unwrap(),
            "neural networks, deep learning. the learner models networks."
        );
        assert!(tokenizer.tokenize("").unwrap().is_empty());
    }

    #[test]
    fn test_hf_tokenizer_chunks_round_trip_within_window() {
        let dir = tempfile::tempdir().unwrap();
        write_wordpiece_tokenizer(dir.path());
        let tokenizer = HfTokenizer::from_model_dir(dir.path()).unwrap();

        let tokens = tokenizer.tokenize(WORDPIECE_TEXT).unwrap();
        let chunks = Chunker::new(6, 2).unwrap().chunk(&tokens, &tokenizer).unwrap();

        let spans: Vec<(usize, usize)> = chunks
            .iter()
            .map(|c| (c.token_start, c.token_end))
            .collect();
        assert_eq!(spans, vec![(0, 6), (4, 10), (8, 14), (12, 16)]);

        for chunk in &chunks {
            let again = tokenizer.tokenize(&chunk.text).unwrap();
            assert!(
                again.len() <= chunk.token_count(),
                "chunk {} re-tokenized to {} tokens: {:?}",
                chunk.position,
                again.len(),
                chunk.text
            );
            assert!(!chunk.text.contains(CONTINUATION_PREFIX));
        }

        assert_eq!(chunks[0].text, "neural networks, deep learn");
        assert_eq!((chunks[0].char_start, chunks[0].char_end), (0, 27));
        assert_eq!(
            WORDPIECE_TEXT[chunks[0].char_start..chunks[0].char_end].to_lowercase(),
            chunks[0].text
        );

        // Window 3 starts on "##s"; it decodes from the next whole word.
        assert_eq!(tokens[12].text, "##s");
        assert_eq!(chunks[3].text, "networks.");

        // A span of continuation pieces alone keeps its fragment.
        assert_eq!(tokenizer.detokenize(&tokens[2..3]).unwrap(), "s");
    }

    #[test]
    fn test_hf_tokenizer_missing_file() {
        let result = HfTokenizer::from_model_dir(Path::new("/nonexistent/path"));
        assert!(matches!(result, Err(TokenizerError::LoadFailed(_))));
    }

    /// Requires the downloaded model files.
    /// Run with: cargo test tokenizer -- --ignored
    #[test]
    #[ignore]
    fn test_hf_tokenizer_with_real_model() {
        let model_dir = Path::new("models/all-MiniLM-L6-v2");
        if !model_dir.join("tokenizer.json").exists() {
            eprintln!("Skipping: model files not downloaded");
            return;
        }

        let tokenizer = HfTokenizer::from_model_dir(model_dir).unwrap();
        let tokens = tokenizer.tokenize("Neural networks learn representations.").unwrap();
        assert!(tokens.len() >= 4);
        assert!(tokens.windows(2).all(|w| w[0].char_start <= w[1].char_start));

        let text = tokenizer.detokenize(&tokens).unwrap();
        assert!(text.contains("neural networks"));
        assert!(tokenizer.tokenize("").unwrap().is_empty());
    }
}
