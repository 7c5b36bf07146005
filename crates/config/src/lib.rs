//! Configuration for the MediServe retrieval service
//!
//! Settings load from an optional file plus `MEDISERVE__`-prefixed
//! environment variables; every section has serde defaults so an empty
//! configuration is a working development configuration.

pub mod constants;
pub mod settings;

pub use settings::{
    ChunkStrategy, ChunkingSettings, ConfigError, CorpusLayout, CorpusSettings,
    ExtractionSettings, GenerationSettings, RetrievalSettings, Settings,
};
