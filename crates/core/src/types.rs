//! Shared domain types.
//!
//! Chunk records are the typed replacement for the metadata dictionaries the
//! indexes persist: required fields are plain, optional fields are `Option`
//! with serde defaults so older stores keep loading.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Origin of an extracted passage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Text block extracted from a page.
    #[default]
    Text,
    /// Detected table rendered to Markdown.
    Table,
    /// OCR output from an image or a scanned page.
    ImageOcr,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::Text => write!(f, "text"),
            SourceType::Table => write!(f, "table"),
            SourceType::ImageOcr => write!(f, "image_ocr"),
        }
    }
}

/// Metadata for one indexed chunk, one-to-one with a stored vector row.
///
/// Records loaded from older stores may lack an `id` or a `source` tag; the
/// store assigns a positional id at load and the source defaults to text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    #[serde(default)]
    pub id: String,
    pub document_id: String,
    pub patient_id: String,
    #[serde(default, alias = "type")]
    pub source: SourceType,
    #[serde(default)]
    pub page: u32,
    pub text: String,
    #[serde(default)]
    pub file_name: Option<String>,
    /// Tag of the embedding model the stored vector came from.
    #[serde(default)]
    pub embedder: String,
}

impl ChunkRecord {
    /// Deterministic chunk id: re-ingesting the same document reproduces the
    /// same ids, so upserts replace rather than duplicate.
    pub fn chunk_id(document_id: &str, source: SourceType, page: u32, ordinal: usize) -> String {
        format!("doc{document_id}_{source}_p{page}_c{ordinal}")
    }
}

/// Document formats the ingestion pipeline accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Jpg,
    Jpeg,
    Png,
    Tiff,
    Bmp,
    Txt,
}

impl FileType {
    /// Parse the file-type string carried by the ingestion trigger.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "jpg" => Some(Self::Jpg),
            "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "tiff" => Some(Self::Tiff),
            "bmp" => Some(Self::Bmp),
            "txt" => Some(Self::Txt),
            _ => None,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(
            self,
            Self::Jpg | Self::Jpeg | Self::Png | Self::Tiff | Self::Bmp
        )
    }
}

/// Ingestion trigger input, handed over by the external task system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub document_id: String,
    pub patient_id: String,
    pub file_path: PathBuf,
    /// File-type string as received from the task payload (e.g. "pdf").
    pub file_type: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// Terminal state of one document ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Indexed,
    Failed,
}

/// Ingestion result, persisted by the caller onto the document record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub document_id: String,
    pub status: IngestStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    pub chunks_indexed: usize,
    pub processed_at: DateTime<Utc>,
}

impl IngestOutcome {
    pub fn indexed(document_id: impl Into<String>, chunks_indexed: usize) -> Self {
        Self {
            document_id: document_id.into(),
            status: IngestStatus::Indexed,
            error_message: None,
            chunks_indexed,
            processed_at: Utc::now(),
        }
    }

    pub fn failed(document_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            status: IngestStatus::Failed,
            error_message: Some(message.into()),
            chunks_indexed: 0,
            processed_at: Utc::now(),
        }
    }
}

/// Query endpoint input from the messaging layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub patient_id: String,
    pub query_text: String,
    #[serde(default)]
    pub session_id: String,
}

/// Query endpoint output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer_text: String,
    pub patient_id: String,
    pub session_id: String,
    pub latency_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_deterministic() {
        let a = ChunkRecord::chunk_id("42", SourceType::Table, 3, 7);
        let b = ChunkRecord::chunk_id("42", SourceType::Table, 3, 7);
        assert_eq!(a, b);
        assert_eq!(a, "doc42_table_p3_c7");
    }

    #[test]
    fn record_without_id_or_source_deserializes() {
        let json = r#"{
            "document_id": "d1",
            "patient_id": "p1",
            "page": 2,
            "text": "contenu"
        }"#;
        let record: ChunkRecord = serde_json::from_str(json).unwrap();
        assert!(record.id.is_empty());
        assert_eq!(record.source, SourceType::Text);
        assert_eq!(record.page, 2);
    }

    #[test]
    fn record_accepts_legacy_type_key() {
        let json = r#"{
            "document_id": "d1",
            "patient_id": "p1",
            "type": "image_ocr",
            "text": "scan"
        }"#;
        let record: ChunkRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.source, SourceType::ImageOcr);
    }

    #[test]
    fn file_type_parses_case_insensitively() {
        assert_eq!(FileType::parse("PDF"), Some(FileType::Pdf));
        assert_eq!(FileType::parse("jpeg"), Some(FileType::Jpeg));
        assert_eq!(FileType::parse("docx"), None);
        assert!(FileType::parse("png").unwrap().is_image());
        assert!(!FileType::Pdf.is_image());
    }
}
