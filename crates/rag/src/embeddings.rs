//! Text Embeddings
//!
//! Embedding models are loaded once per process, treated as read-only pure
//! functions and injected as `Arc<dyn TextEmbedder>` wherever a vector is
//! needed. The ONNX-backed embedder lives behind the `onnx` feature; the
//! default build ships a deterministic hashing embedder that needs no model
//! files.

#[cfg(feature = "onnx")]
use std::path::Path;

#[cfg(feature = "onnx")]
use ndarray::Array2;
#[cfg(feature = "onnx")]
use ort::{session::builder::GraphOptimizationLevel, session::Session, value::Tensor};
#[cfg(feature = "onnx")]
use tokenizers::Tokenizer;

use crate::RagError;

/// Maps text to a fixed-dimension, L2-normalized vector.
pub trait TextEmbedder: Send + Sync {
    /// Embed one text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, RagError>;

    /// Embed a batch; the default delegates to `embed`.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RagError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Fixed output dimension.
    fn dim(&self) -> usize;

    /// Identifier recorded on chunk metadata.
    fn tag(&self) -> &str;
}

/// Embedding configuration.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Embedding dimension
    pub dim: usize,
    /// Maximum sequence length
    pub max_seq_len: usize,
    /// Normalize embeddings
    pub normalize: bool,
    /// Batch size for bulk embedding
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dim: mediserve_config::constants::retrieval::EMBEDDING_DIM,
            max_seq_len: 512,
            normalize: true,
            batch_size: 32,
        }
    }
}

/// Scale `v` to unit L2 norm; a zero vector is left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Inner product; cosine similarity when both sides are normalized.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Deterministic hashing embedder.
///
/// Projects words and character trigrams onto the vector by FNV hash, so
/// texts sharing tokens land near each other. Stable across processes,
/// which the stored vectors require.
pub struct HashEmbedder {
    config: EmbeddingConfig,
    tag: String,
}

impl HashEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        let tag = format!("hash-{}", config.dim);
        Self { config, tag }
    }

    fn bump(vector: &mut [f32], token: &str, weight: f32) {
        let idx = (fnv1a(token.as_bytes()) as usize) % vector.len();
        vector[idx] += weight;
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(EmbeddingConfig::default())
    }
}

impl TextEmbedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let mut vector = vec![0.0f32; self.config.dim];

        for word in text.split(|c: char| !c.is_alphanumeric()) {
            if word.is_empty() {
                continue;
            }
            let word = word.to_lowercase();
            Self::bump(&mut vector, &word, 1.0);

            let chars: Vec<char> = word.chars().collect();
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                Self::bump(&mut vector, &trigram, 0.5);
            }
        }

        if self.config.normalize {
            l2_normalize(&mut vector);
        }
        Ok(vector)
    }

    fn dim(&self) -> usize {
        self.config.dim
    }

    fn tag(&self) -> &str {
        &self.tag
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Sentence embedder backed by an ONNX model (mean pooling over the last
/// hidden state, then L2 normalization).
#[cfg(feature = "onnx")]
pub struct OnnxEmbedder {
    session: Session,
    tokenizer: Tokenizer,
    config: EmbeddingConfig,
    tag: String,
}

#[cfg(feature = "onnx")]
impl OnnxEmbedder {
    pub fn new(
        model_path: impl AsRef<Path>,
        tokenizer_path: impl AsRef<Path>,
        config: EmbeddingConfig,
        tag: impl Into<String>,
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
            tag: tag.into(),
        })
    }

    fn embed_chunk(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RagError> {
        let batch_size = texts.len();
        let seq_len = self.config.max_seq_len;

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| RagError::Embedding(e.to_string()))?;

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
            .map_err(|e| RagError::Embedding(e.to_string()))?;
        let attention_mask = Array2::from_shape_vec((batch_size, seq_len), attention_mask)
            .map_err(|e| RagError::Embedding(e.to_string()))?;
        let token_type_ids = Array2::from_shape_vec((batch_size, seq_len), token_type_ids)
            .map_err(|e| RagError::Embedding(e.to_string()))?;

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

        let (shape, hidden) = outputs
            .get("last_hidden_state")
            .ok_or_else(|| RagError::Model("missing output tensor: last_hidden_state".into()))?
            .try_extract_tensor::<f32>()
            .map_err(|e| RagError::Model(e.to_string()))?;

        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        let &[_, tensor_seq_len, hidden_dim] = &dims[..] else {
            return Err(RagError::Model(format!(
                "unexpected tensor shape: {dims:?}"
            )));
        };

        let mut embeddings = Vec::with_capacity(batch_size);
        for (i, encoding) in encodings.iter().enumerate() {
            let tokens = encoding.get_ids().len().min(seq_len).min(tensor_seq_len);
            let mut embedding = vec![0.0f32; self.config.dim];
            for j in 0..tokens {
                for (k, value) in embedding
                    .iter_mut()
                    .enumerate()
                    .take(self.config.dim.min(hidden_dim))
                {
                    *value += hidden[i * tensor_seq_len * hidden_dim + j * hidden_dim + k];
                }
            }
            for value in &mut embedding {
                *value /= tokens.max(1) as f32;
            }
            if self.config.normalize {
                l2_normalize(&mut embedding);
            }
            embeddings.push(embedding);
        }
        Ok(embeddings)
    }
}

#[cfg(feature = "onnx")]
impl TextEmbedder for OnnxEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let mut batch = self.embed_chunk(&[text])?;
        batch
            .pop()
            .ok_or_else(|| RagError::Embedding("empty embedding batch".into()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.config.batch_size) {
            out.extend(self.embed_chunk(chunk)?);
        }
        Ok(out)
    }

    fn dim(&self) -> usize {
        self.config.dim
    }

    fn tag(&self) -> &str {
        &self.tag
    }
}
