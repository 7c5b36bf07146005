//! Main settings module

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{chunking, extraction, generation, retrieval};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main application settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Corpus storage configuration
    #[serde(default)]
    pub corpus: CorpusSettings,

    /// Retrieval configuration
    #[serde(default)]
    pub retrieval: RetrievalSettings,

    /// Chunking configuration
    #[serde(default)]
    pub chunking: ChunkingSettings,

    /// Extraction configuration
    #[serde(default)]
    pub extraction: ExtractionSettings,

    /// Generation-service configuration
    #[serde(default)]
    pub generation: GenerationSettings,
}

impl Settings {
    /// Load settings from an optional file, then environment overrides
    /// (`MEDISERVE__SECTION__KEY`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let settings: Settings = builder
            .add_source(Environment::with_prefix("MEDISERVE").separator("__"))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.retrieval.alpha) {
            return Err(ConfigError::Invalid(format!(
                "retrieval.alpha must be in [0, 1], got {}",
                self.retrieval.alpha
            )));
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid("retrieval.top_k must be > 0".into()));
        }
        if self.corpus.embedding_dim == 0 {
            return Err(ConfigError::Invalid(
                "corpus.embedding_dim must be > 0".into(),
            ));
        }
        if self.chunking.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunking.chunk_size must be > 0".into()));
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.overlap, self.chunking.chunk_size
            )));
        }
        if !(-1.0..=1.0).contains(&self.chunking.semantic_threshold) {
            return Err(ConfigError::Invalid(format!(
                "chunking.semantic_threshold must be in [-1, 1], got {}",
                self.chunking.semantic_threshold
            )));
        }
        Ok(())
    }
}

/// Corpus storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusSettings {
    /// Root directory holding one subdirectory per patient.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Fixed vector dimension for every store.
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Whether patient corpora carry a sparse (BM25) index.
    #[serde(default = "default_true")]
    pub use_sparse: bool,
}

impl Default for CorpusSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            embedding_dim: default_embedding_dim(),
            use_sparse: true,
        }
    }
}

/// Retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSettings {
    /// Weight of the dense column in fusion; 1.0 is dense-only.
    #[serde(default = "default_alpha")]
    pub alpha: f32,
    #[serde(default = "default_dense_k")]
    pub dense_k: usize,
    #[serde(default = "default_sparse_k")]
    pub sparse_k: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Enable cross-encoder reranking of the fused candidates.
    #[serde(default)]
    pub rerank: bool,
    /// Per-call deadline; unlimited when absent.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            dense_k: default_dense_k(),
            sparse_k: default_sparse_k(),
            top_k: default_top_k(),
            rerank: false,
            deadline_ms: None,
        }
    }
}

/// Chunking strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Fixed word windows with overlap.
    #[default]
    Lexical,
    /// Greedy sentence merging by embedding similarity.
    Semantic,
}

/// Chunking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingSettings {
    #[serde(default)]
    pub strategy: ChunkStrategy,
    /// Words per lexical chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Word overlap between consecutive lexical chunks.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    /// Cosine threshold for extending a semantic chunk.
    #[serde(default = "default_semantic_threshold")]
    pub semantic_threshold: f32,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::Lexical,
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            semantic_threshold: default_semantic_threshold(),
        }
    }
}

/// Extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSettings {
    /// OCR language passed to tesseract.
    #[serde(default = "default_ocr_language")]
    pub ocr_language: String,
    /// Rasterization resolution for scanned-page OCR.
    #[serde(default = "default_ocr_resolution")]
    pub ocr_resolution: u32,
    #[serde(default = "default_tesseract_bin")]
    pub tesseract_bin: String,
    #[serde(default = "default_pdftoppm_bin")]
    pub pdftoppm_bin: String,
    #[serde(default = "default_pdftotext_bin")]
    pub pdftotext_bin: String,
    /// Detect whitespace-aligned tables in page text.
    #[serde(default = "default_true")]
    pub detect_tables: bool,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            ocr_language: default_ocr_language(),
            ocr_resolution: default_ocr_resolution(),
            tesseract_bin: default_tesseract_bin(),
            pdftoppm_bin: default_pdftoppm_bin(),
            pdftotext_bin: default_pdftotext_bin(),
            detect_tables: true,
        }
    }
}

/// Generation-service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSettings {
    /// OpenAI-compatible endpoint of the completion service.
    #[serde(default = "default_generation_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Low temperature keeps answers grounded in the quoted passages.
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_generation_timeout_ms")]
    pub timeout_ms: u64,
    /// Minimum spacing between generation calls (service rate limits).
    #[serde(default = "default_min_call_interval_ms")]
    pub min_call_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_passage_chars")]
    pub max_passage_chars: usize,
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            endpoint: default_generation_endpoint(),
            model: default_generation_model(),
            api_key: None,
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            timeout_ms: default_generation_timeout_ms(),
            min_call_interval_ms: default_min_call_interval_ms(),
            max_retries: default_max_retries(),
            max_passage_chars: default_max_passage_chars(),
            max_prompt_chars: default_max_prompt_chars(),
        }
    }
}

/// Resolves per-patient corpus directories under the data root.
#[derive(Debug, Clone)]
pub struct CorpusLayout {
    data_dir: PathBuf,
}

impl CorpusLayout {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn from_settings(settings: &CorpusSettings) -> Self {
        Self::new(settings.data_dir.clone())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory holding one patient's store file, ANN file and sparse index.
    pub fn patient_dir(&self, patient_id: &str) -> PathBuf {
        self.data_dir.join(format!("patient_{patient_id}"))
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/corpora")
}

fn default_embedding_dim() -> usize {
    retrieval::EMBEDDING_DIM
}

fn default_true() -> bool {
    true
}

fn default_alpha() -> f32 {
    retrieval::DEFAULT_ALPHA
}

fn default_dense_k() -> usize {
    retrieval::DEFAULT_DENSE_K
}

fn default_sparse_k() -> usize {
    retrieval::DEFAULT_SPARSE_K
}

fn default_top_k() -> usize {
    retrieval::DEFAULT_TOP_K
}

fn default_chunk_size() -> usize {
    chunking::DEFAULT_CHUNK_SIZE
}

fn default_overlap() -> usize {
    chunking::DEFAULT_OVERLAP
}

fn default_semantic_threshold() -> f32 {
    chunking::DEFAULT_SEMANTIC_THRESHOLD
}

fn default_ocr_language() -> String {
    extraction::DEFAULT_OCR_LANGUAGE.to_string()
}

fn default_ocr_resolution() -> u32 {
    extraction::DEFAULT_OCR_RESOLUTION
}

fn default_tesseract_bin() -> String {
    "tesseract".to_string()
}

fn default_pdftoppm_bin() -> String {
    "pdftoppm".to_string()
}

fn default_pdftotext_bin() -> String {
    "pdftotext".to_string()
}

fn default_generation_endpoint() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_generation_model() -> String {
    "qwen2.5:7b-instruct".to_string()
}

fn default_max_tokens() -> usize {
    generation::DEFAULT_MAX_TOKENS
}

fn default_generation_timeout_ms() -> u64 {
    generation::DEFAULT_TIMEOUT_MS
}

fn default_min_call_interval_ms() -> u64 {
    generation::DEFAULT_MIN_CALL_INTERVAL_MS
}

fn default_max_retries() -> u32 {
    generation::DEFAULT_MAX_RETRIES
}

fn default_max_passage_chars() -> usize {
    generation::DEFAULT_MAX_PASSAGE_CHARS
}

fn default_max_prompt_chars() -> usize {
    generation::DEFAULT_MAX_PROMPT_CHARS
}
