//! Hybrid retrieval over per-patient document corpora
//!
//! Features:
//! - Persistent columnar vector store with a self-healing flat ANN index
//! - Sparse BM25 search via Tantivy with an accent-folding analyzer
//! - Hybrid fusion: per-column max normalization + alpha-weighted sum
//! - Optional batched cross-encoder reranking
//! - Embedding and reranking models loaded once per process and injected

pub mod corpus;
pub mod embeddings;
pub mod reranker;
pub mod retriever;
pub mod sparse_index;
pub mod vector_store;

pub use corpus::CorpusStore;
#[cfg(feature = "onnx")]
pub use embeddings::OnnxEmbedder;
pub use embeddings::{EmbeddingConfig, HashEmbedder, TextEmbedder};
#[cfg(feature = "onnx")]
pub use reranker::CrossEncoderReranker;
pub use reranker::{LexicalScorer, PassageScorer};
pub use retriever::{HybridRetriever, RetrievalResult, RetrieveOptions};
pub use sparse_index::SparseIndex;
pub use vector_store::VectorStore;

use thiserror::Error;

/// Retrieval-layer errors.
///
/// Degradations (zero-signal normalization, absent or failing sparse index,
/// unavailable reranker) are logged fallbacks, not variants here.
#[derive(Debug, Error)]
pub enum RagError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("vector store not loaded")]
    NotLoaded,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("search error: {0}")]
    Search(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("reranker error: {0}")]
    Reranker(String),

    #[error("retrieval deadline exceeded")]
    Timeout,
}

impl From<RagError> for mediserve_core::Error {
    fn from(err: RagError) -> Self {
        mediserve_core::Error::Retrieval(err.to_string())
    }
}
