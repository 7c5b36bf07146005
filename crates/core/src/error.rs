//! Aggregated error type.
//!
//! Each crate defines its own error enum and converts into this one at the
//! service boundary, so embedding callers deal with a single type.

use thiserror::Error;

/// Top-level service error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("retrieval error: {0}")]
    Retrieval(String),

    #[error("ingestion error: {0}")]
    Ingestion(String),

    #[error("generation error: {0}")]
    Generation(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Result alias for service-level operations.
pub type Result<T> = std::result::Result<T, Error>;
