//! Document ingestion for patient corpora
//!
//! One document at a time: extract tagged passages (page text, detected
//! tables, OCR), chunk them, embed every chunk, then merge into the
//! patient's corpus. Persisted state is only touched once every chunk has
//! embedded successfully. Failures are recorded on the ingestion outcome
//! instead of propagating, so a bad document never aborts a batch.

pub mod chunker;
pub mod extract;
pub mod pipeline;

pub use chunker::{Chunker, ChunkingConfig};
pub use extract::{ExtractionConfig, Passage, TextExtractor};
pub use pipeline::IndexingPipeline;

use thiserror::Error;

/// Ingestion-layer errors.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("extraction error: {0}")]
    Extraction(String),

    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("storage error: {0}")]
    Storage(#[from] mediserve_rag::RagError),

    #[error("io error: {0}")]
    Io(String),
}

impl From<IngestError> for mediserve_core::Error {
    fn from(err: IngestError) -> Self {
        mediserve_core::Error::Ingestion(err.to_string())
    }
}
