/// ONNX Runtime embedder using the `ort` crate.
///
/// Loads an all-MiniLM-L6-v2 ONNX export, runs batched inference, applies
/// mean pooling with the attention mask, and L2-normalizes the result.
use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, info};

use super::tokenizer::{BertTokenizer, TokenizerOutput};
use super::{Embedder, EmbedderError, l2_normalize};

/// ONNX-backed embedder implementing the `Embedder` trait.
pub struct OnnxEmbedder {
    session: Mutex<Session>,
    tokenizer: BertTokenizer,
    dimensions: usize,
    model_id: String,
}

impl OnnxEmbedder {
    /// Create a new `OnnxEmbedder` by loading a model from the given directory.
    ///
    /// Expects `model.onnx` and `tokenizer.json` in `model_dir`; `dimensions`
    /// is the model's hidden size.
    pub fn new(model_dir: &Path, model_id: &str, dimensions: usize) -> Result<Self, EmbedderError> {
        let model_path = model_dir.join("model.onnx");

        if !model_path.exists() {
            return Err(EmbedderError::ModelLoadFailed(format!(
                "model.onnx not found in {}",
                model_dir.display()
            )));
        }

        info!("Initializing ONNX Runtime...");

        let session = Session::builder()
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("session builder error: {e}")))?
            .with_intra_threads(4)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("thread config error: {e}")))?
            .with_inter_threads(4)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("thread config error: {e}")))?
            .commit_from_file(&model_path)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("model load error: {e}")))?;

        info!("ONNX model loaded successfully");

        let tokenizer = BertTokenizer::from_model_dir(model_dir)
            .map_err(|e| EmbedderError::TokenizerError(format!("{e}")))?;

        info!("Tokenizer loaded (vocab size: {})", tokenizer.vocab_size());

        let embedder = Self {
            session: Mutex::new(session),
            tokenizer,
            dimensions,
            model_id: model_id.to_string(),
        };

        // A configured size that disagrees with the model fails here, not on
        // the first indexing request.
        embedder.embed("dimension check").map_err(|e| {
            EmbedderError::ModelLoadFailed(format!(
                "{model_id} does not produce {dimensions}-dimensional embeddings: {e}"
            ))
        })?;

        Ok(embedder)
    }

    /// Run one padded batch through the model.
    fn infer(&self, batch: &[TokenizerOutput]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let batch_size = batch.len();
        let seq_len = batch[0].input_ids.len();

        let mut input_ids = Vec::with_capacity(batch_size * seq_len);
        let mut attention_mask = Vec::with_capacity(batch_size * seq_len);
        for row in batch {
            input_ids.extend_from_slice(&row.input_ids);
            attention_mask.extend_from_slice(&row.attention_mask);
        }

        // (shape, data) tuple form avoids ndarray version coupling with ort
        let input_ids_val = Tensor::from_array(([batch_size, seq_len], input_ids))
            .map_err(|e| EmbedderError::InferenceFailed(format!("input_ids error: {e}")))?;
        let attention_mask_val =
            Tensor::from_array(([batch_size, seq_len], attention_mask.clone())).map_err(|e| {
                EmbedderError::InferenceFailed(format!("attention_mask error: {e}"))
            })?;
        let token_type_ids_val =
            Tensor::from_array(([batch_size, seq_len], vec![0i64; batch_size * seq_len]))
                .map_err(|e| {
                    EmbedderError::InferenceFailed(format!("token_type_ids error: {e}"))
                })?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| EmbedderError::InferenceFailed(format!("lock poisoned: {e}")))?;
        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids_val,
                "attention_mask" => attention_mask_val,
                "token_type_ids" => token_type_ids_val,
            ])
            .map_err(|e| EmbedderError::InferenceFailed(format!("inference failed: {e}")))?;

        // Output shape: [batch_size, seq_len, hidden_size]
        let (shape, hidden_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("output extraction: {e}")))?;
        check_hidden_shape(shape, hidden_data.len(), batch_size, seq_len, self.dimensions)?;

        let row_len = seq_len * self.dimensions;
        let embeddings = (0..batch_size)
            .map(|b| {
                let pooled = mean_pooling(
                    &hidden_data[b * row_len..(b + 1) * row_len],
                    &attention_mask[b * seq_len..(b + 1) * seq_len],
                    seq_len,
                    self.dimensions,
                );
                l2_normalize(&pooled)
            })
            .collect();

        Ok(embeddings)
    }
}

impl Embedder for OnnxEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut vectors = self.embed_batch(&[text])?;
        vectors
            .pop()
            .ok_or_else(|| EmbedderError::InferenceFailed("model returned no output".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbedderError::EmptyInput);
        }

        let batch = self
            .tokenizer
            .tokenize_batch(texts)
            .map_err(|e| EmbedderError::TokenizerError(format!("{e}")))?;

        debug!(
            "Running inference on batch of {} (seq_len={})",
            batch.len(),
            batch[0].input_ids.len()
        );
        self.infer(&batch)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// The hidden-state tensor must be `[batch_size, seq_len, dimensions]` and
/// hold exactly that many values before it is sliced per row.
fn check_hidden_shape(
    shape: &[i64],
    data_len: usize,
    batch_size: usize,
    seq_len: usize,
    dimensions: usize,
) -> Result<(), EmbedderError> {
    let expected = [batch_size, seq_len, dimensions];
    let matches = shape.len() == 3
        && shape
            .iter()
            .zip(expected)
            .all(|(&got, want)| usize::try_from(got).is_ok_and(|got| got == want));

    if !matches || data_len != batch_size * seq_len * dimensions {
        return Err(EmbedderError::InferenceFailed(format!(
            "model output shape {shape:?} does not match expected {expected:?}"
        )));
    }
    Ok(())
}

/// Mean pooling over hidden states weighted by attention mask.
///
/// `hidden_data` is a flat array with shape `[seq_len, hidden_size]`.
fn mean_pooling(
    hidden_data: &[f32],
    attention_mask: &[i64],
    seq_len: usize,
    hidden_size: usize,
) -> Vec<f32> {
    let mut result = vec![0.0f32; hidden_size];
    let mut mask_sum: f32 = 0.0;

    for t in 0..seq_len {
        let mask = attention_mask[t] as f32;
        mask_sum += mask;

        for h in 0..hidden_size {
            let idx = t * hidden_size + h;
            result[h] += hidden_data[idx] * mask;
        }
    }

    // Average by number of real tokens
    if mask_sum > 0.0 {
        for v in &mut result {
            *v /= mask_sum;
        }
    }

    result
}
