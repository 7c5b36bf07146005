//! Tuned defaults shared between settings and call sites.

/// Retrieval defaults.
pub mod retrieval {
    /// Embedding dimension (all-mpnet class models).
    pub const EMBEDDING_DIM: usize = 768;
    /// Weight of the dense column in score fusion.
    pub const DEFAULT_ALPHA: f32 = 0.5;
    pub const DEFAULT_DENSE_K: usize = 10;
    pub const DEFAULT_SPARSE_K: usize = 10;
    pub const DEFAULT_TOP_K: usize = 5;
}

/// Chunking defaults.
pub mod chunking {
    /// Words per lexical chunk.
    pub const DEFAULT_CHUNK_SIZE: usize = 1000;
    /// Word overlap between consecutive lexical chunks.
    pub const DEFAULT_OVERLAP: usize = 200;
    /// Cosine threshold for extending a semantic chunk.
    pub const DEFAULT_SEMANTIC_THRESHOLD: f32 = 0.8;
}

/// Extraction defaults.
pub mod extraction {
    /// OCR language passed to tesseract. Patient documents are French.
    pub const DEFAULT_OCR_LANGUAGE: &str = "fra";
    /// Rasterization resolution for scanned-page OCR.
    pub const DEFAULT_OCR_RESOLUTION: u32 = 300;
}

/// Generation defaults.
pub mod generation {
    pub const DEFAULT_MAX_TOKENS: usize = 500;
    pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
    /// Minimum spacing between generation-service calls.
    pub const DEFAULT_MIN_CALL_INTERVAL_MS: u64 = 1_000;
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    /// Per-passage character bound in the grounding prompt.
    pub const DEFAULT_MAX_PASSAGE_CHARS: usize = 500;
    /// Overall prompt character bound.
    pub const DEFAULT_MAX_PROMPT_CHARS: usize = 6_000;
}
