//! Core types for the MediServe retrieval service
//!
//! This crate provides the types shared across the other crates:
//! - Chunk records and source tagging for indexed passages
//! - Ingestion trigger and query endpoint interface types
//! - The aggregated error type

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    ChunkRecord, FileType, IngestOutcome, IngestRequest, IngestStatus, QueryRequest,
    QueryResponse, SourceType,
};
