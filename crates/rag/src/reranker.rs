//! Cross-Encoder Reranking
//!
//! Second-pass scoring of (query, passage) pairs. The scorer receives every
//! candidate pair in one batched call so model invocation overhead is paid
//! once per retrieval, not once per pair. The ONNX cross-encoder lives
//! behind the `onnx` feature; the default build ships a token-overlap
//! scorer good enough for development and tests.

#[cfg(feature = "onnx")]
use std::path::Path;

#[cfg(feature = "onnx")]
use ndarray::Array2;
#[cfg(feature = "onnx")]
use ort::{session::builder::GraphOptimizationLevel, session::Session, value::Tensor};
#[cfg(feature = "onnx")]
use tokenizers::Tokenizer;

use crate::RagError;

/// Scores (query, passage) pairs, one batched call per rerank pass.
pub trait PassageScorer: Send + Sync {
    fn score_batch(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>, RagError>;
}

/// Token-overlap scorer: fraction of query tokens present in the passage.
///
/// An empty passage scores 0.0, so reranking over degenerate candidates
/// ranks them last instead of failing.
pub struct LexicalScorer;

impl LexicalScorer {
    pub fn score(query: &str, passage: &str) -> f32 {
        let query_tokens: Vec<String> = tokens(query);
        if query_tokens.is_empty() {
            return 0.0;
        }
        let passage_tokens: std::collections::HashSet<String> =
            tokens(passage).into_iter().collect();
        let matched = query_tokens
            .iter()
            .filter(|t| passage_tokens.contains(*t))
            .count();
        matched as f32 / query_tokens.len() as f32
    }
}

impl PassageScorer for LexicalScorer {
    fn score_batch(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>, RagError> {
        Ok(passages
            .iter()
            .map(|passage| Self::score(query, passage))
            .collect())
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Reranker configuration.
#[derive(Debug, Clone)]
pub struct RerankerConfig {
    /// Maximum sequence length for the encoded pair
    pub max_seq_len: usize,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self { max_seq_len: 256 }
    }
}

/// Cross-encoder reranker backed by an ONNX sequence-classification model.
#[cfg(feature = "onnx")]
pub struct CrossEncoderReranker {
    session: Session,
    tokenizer: Tokenizer,
    config: RerankerConfig,
}

#[cfg(feature = "onnx")]
impl CrossEncoderReranker {
    pub fn new(
        model_path: impl AsRef<Path>,
        tokenizer_path: impl AsRef<Path>,
        config: RerankerConfig,
    ) -> Result<Self, RagError> {
        let session = Session::builder()
            .map_err(|e| RagError::Model(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| RagError::Model(e.to_string()))?
            .with_intra_threads(2)
            .map_err(|e| RagError::Model(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| RagError::Model(e.to_string()))?;

        let tokenizer =
            Tokenizer::from_file(tokenizer_path).map_err(|e| RagError::Model(e.to_string()))?;

        Ok(Self {
            session,
            tokenizer,
            config,
        })
    }
}

#[cfg(feature = "onnx")]
impl PassageScorer for CrossEncoderReranker {
    fn score_batch(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>, RagError> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let batch_size = passages.len();
        let seq_len = self.config.max_seq_len;

        let pairs: Vec<tokenizers::EncodeInput> = passages
            .iter()
            .map(|passage| (query.to_string(), passage.to_string()).into())
            .collect();
        let encodings = self
            .tokenizer
            .encode_batch(pairs, true)
            .map_err(|e| RagError::Reranker(e.to_string()))?;

        let mut input_ids = vec![0i64; batch_size * seq_len];
        let mut attention_mask = vec![0i64; batch_size * seq_len];
        let mut token_type_ids = vec![0i64; batch_size * seq_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let types = encoding.get_type_ids();
            let len = ids.len().min(seq_len);
            let offset = i * seq_len;
            for j in 0..len {
                input_ids[offset + j] = ids[j] as i64;
                attention_mask[offset + j] = mask[j] as i64;
                token_type_ids[offset + j] = types[j] as i64;
            }
        }

        let input_ids = Array2::from_shape_vec((batch_size, seq_len), input_ids)
            .map_err(|e| RagError::Reranker(e.to_string()))?;
        let attention_mask = Array2::from_shape_vec((batch_size, seq_len), attention_mask)
            .map_err(|e| RagError::Reranker(e.to_string()))?;
        let token_type_ids = Array2::from_shape_vec((batch_size, seq_len), token_type_ids)
            .map_err(|e| RagError::Reranker(e.to_string()))?;

        let input_ids_tensor =
            Tensor::from_array(input_ids).map_err(|e| RagError::Model(e.to_string()))?;
        let attention_mask_tensor =
            Tensor::from_array(attention_mask).map_err(|e| RagError::Model(e.to_string()))?;
        let token_type_ids_tensor =
            Tensor::from_array(token_type_ids).map_err(|e| RagError::Model(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
                "token_type_ids" => token_type_ids_tensor,
            ])
            .map_err(|e| RagError::Model(e.to_string()))?;

        let (shape, logits) = outputs
            .get("logits")
            .ok_or_else(|| RagError::Model("missing output tensor: logits".into()))?
            .try_extract_tensor::<f32>()
            .map_err(|e| RagError::Model(e.to_string()))?;

        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        let per_row = if dims.len() == 2 { dims[1] } else { 1 };

        let scores = (0..batch_size)
            .map(|i| {
                let logit = logits.get(i * per_row).copied().unwrap_or(0.0);
                // Sigmoid keeps rerank scores comparable across batches.
                1.0 / (1.0 + (-logit).exp())
            })
            .collect();
        Ok(scores)
    }
}
