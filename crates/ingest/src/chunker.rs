//! Chunking of extracted passages.
//!
//! Two strategies: fixed word windows with overlap, and semantic chunking.
//! A semantic chunk greedily absorbs the next sentence while the sentence
//! embedding stays close (cosine) to the running normalized mean of the
//! chunk; a drop below the threshold starts a new chunk.

use unicode_segmentation::UnicodeSegmentation;

use mediserve_config::{ChunkStrategy, ChunkingSettings};
use mediserve_rag::embeddings::{dot, l2_normalize};
use mediserve_rag::{RagError, TextEmbedder};

/// Chunking configuration.
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub strategy: ChunkStrategy,
    /// Words per lexical chunk
    pub chunk_size: usize,
    /// Word overlap between consecutive lexical chunks
    pub overlap: usize,
    /// Cosine threshold for extending a semantic chunk
    pub semantic_threshold: f32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        use mediserve_config::constants::chunking;
        Self {
            strategy: ChunkStrategy::Lexical,
            chunk_size: chunking::DEFAULT_CHUNK_SIZE,
            overlap: chunking::DEFAULT_OVERLAP,
            semantic_threshold: chunking::DEFAULT_SEMANTIC_THRESHOLD,
        }
    }
}

impl From<&ChunkingSettings> for ChunkingConfig {
    fn from(settings: &ChunkingSettings) -> Self {
        Self {
            strategy: settings.strategy,
            chunk_size: settings.chunk_size,
            overlap: settings.overlap,
            semantic_threshold: settings.semantic_threshold,
        }
    }
}

/// Splits text passages into embeddable chunks.
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// Split one passage. Semantic chunking needs the embedder; lexical
    /// chunking ignores it.
    pub fn chunk(
        &self,
        text: &str,
        embedder: &dyn TextEmbedder,
    ) -> Result<Vec<String>, RagError> {
        match self.config.strategy {
            ChunkStrategy::Lexical => Ok(lexical_chunks(
                text,
                self.config.chunk_size,
                self.config.overlap,
            )),
            ChunkStrategy::Semantic => {
                semantic_chunks(text, self.config.semantic_threshold, embedder)
            }
        }
    }
}

/// Fixed word windows of `chunk_size` words advancing by
/// `chunk_size - overlap`.
pub fn lexical_chunks(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + chunk_size).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Greedy semantic merging of sentences: extend the current chunk while the
/// next sentence's embedding stays at/above `threshold` cosine similarity
/// to the normalized mean of the chunk's sentence embeddings.
pub fn semantic_chunks(
    text: &str,
    threshold: f32,
    embedder: &dyn TextEmbedder,
) -> Result<Vec<String>, RagError> {
    let sentences: Vec<&str> = text
        .unicode_sentences()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if sentences.is_empty() {
        return Ok(Vec::new());
    }

    let embeddings = embedder.embed_batch(&sentences)?;

    let mut chunks = Vec::new();
    let mut chunk_sentences: Vec<&str> = Vec::new();
    let mut chunk_embeddings: Vec<Vec<f32>> = Vec::new();

    for (sentence, embedding) in sentences.iter().zip(embeddings) {
        if chunk_embeddings.is_empty() {
            chunk_sentences.push(sentence);
            chunk_embeddings.push(embedding);
            continue;
        }

        let mean = normalized_mean(&chunk_embeddings);
        if dot(&embedding, &mean) >= threshold {
            chunk_sentences.push(sentence);
            chunk_embeddings.push(embedding);
        } else {
            chunks.push(chunk_sentences.join(" "));
            chunk_sentences = vec![sentence];
            chunk_embeddings = vec![embedding];
        }
    }

    if !chunk_sentences.is_empty() {
        chunks.push(chunk_sentences.join(" "));
    }
    Ok(chunks)
}

fn normalized_mean(vectors: &[Vec<f32>]) -> Vec<f32> {
    let dim = vectors[0].len();
    let mut mean = vec![0.0f32; dim];
    for vector in vectors {
        for (m, v) in mean.iter_mut().zip(vector) {
            *m += v;
        }
    }
    for m in mean.iter_mut() {
        *m /= vectors.len() as f32;
    }
    l2_normalize(&mut mean);
    mean
}
