//! Document indexing pipeline.
//!
//! Orchestrates extraction → chunking → embedding → corpus merge for one
//! document at a time. Nothing is persisted until every chunk of the
//! document has embedded successfully; after the merge the ANN index is
//! verified and the sparse index receives best-effort upserts. Ingestion is
//! serialized per patient, and a failing document is reported through its
//! outcome without blocking the rest of a batch.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use mediserve_config::CorpusLayout;
use mediserve_core::{ChunkRecord, FileType, IngestOutcome, IngestRequest, SourceType};
use mediserve_rag::corpus::SPARSE_DIR;
use mediserve_rag::{SparseIndex, TextEmbedder, VectorStore};

use crate::chunker::{Chunker, ChunkingConfig};
use crate::extract::{ExtractionConfig, TextExtractor};
use crate::IngestError;

/// Ingests documents into patient corpora.
pub struct IndexingPipeline {
    layout: CorpusLayout,
    extractor: TextExtractor,
    chunker: Chunker,
    embedder: Arc<dyn TextEmbedder>,
    use_sparse: bool,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl IndexingPipeline {
    pub fn new(
        layout: CorpusLayout,
        extractor: TextExtractor,
        chunker: Chunker,
        embedder: Arc<dyn TextEmbedder>,
        use_sparse: bool,
    ) -> Self {
        Self {
            layout,
            extractor,
            chunker,
            embedder,
            use_sparse,
            locks: DashMap::new(),
        }
    }

    /// Wire the pipeline from application settings; the embedder is the
    /// process-wide instance, injected.
    pub fn from_settings(
        settings: &mediserve_config::Settings,
        embedder: Arc<dyn TextEmbedder>,
    ) -> Self {
        Self::new(
            CorpusLayout::from_settings(&settings.corpus),
            TextExtractor::new(ExtractionConfig::from(&settings.extraction)),
            Chunker::new(ChunkingConfig::from(&settings.chunking)),
            embedder,
            settings.corpus.use_sparse,
        )
    }

    /// Ingest one document. All failures are captured in the outcome for
    /// the caller to persist onto the document record; nothing propagates.
    pub async fn ingest_document(&self, request: &IngestRequest) -> IngestOutcome {
        let lock = self
            .locks
            .entry(request.patient_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        // One ingestion at a time per patient corpus.
        let _guard = lock.lock().await;

        match self.ingest_inner(request) {
            Ok(chunks) => {
                tracing::info!(
                    document_id = %request.document_id,
                    patient_id = %request.patient_id,
                    chunks,
                    "document indexed"
                );
                IngestOutcome::indexed(request.document_id.clone(), chunks)
            }
            Err(err) => {
                tracing::error!(
                    document_id = %request.document_id,
                    patient_id = %request.patient_id,
                    error = %err,
                    "document ingestion failed"
                );
                IngestOutcome::failed(request.document_id.clone(), err.to_string())
            }
        }
    }

    /// Ingest a batch sequentially; a failing document does not block the
    /// others.
    pub async fn ingest_batch(&self, requests: &[IngestRequest]) -> Vec<IngestOutcome> {
        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            outcomes.push(self.ingest_document(request).await);
        }
        outcomes
    }

    fn ingest_inner(&self, request: &IngestRequest) -> Result<usize, IngestError> {
        let file_type = FileType::parse(&request.file_type)
            .ok_or_else(|| IngestError::UnsupportedFormat(request.file_type.clone()))?;
        if !request.file_path.exists() {
            return Err(IngestError::Io(format!(
                "file not found: {}",
                request.file_path.display()
            )));
        }

        let passages = self.extractor.extract(&request.file_path, file_type)?;
        if passages.is_empty() {
            return Err(IngestError::Extraction(
                "no text extracted from document".to_string(),
            ));
        }

        // Text passages are chunked; tables and OCR output stay whole.
        let mut units: Vec<(SourceType, u32, String)> = Vec::new();
        for passage in passages {
            match passage.source {
                SourceType::Text => {
                    let chunks = self
                        .chunker
                        .chunk(&passage.text, self.embedder.as_ref())
                        .map_err(|e| IngestError::Embedding(e.to_string()))?;
                    for chunk in chunks {
                        units.push((SourceType::Text, passage.page, chunk));
                    }
                }
                source => units.push((source, passage.page, passage.text)),
            }
        }

        // Embed everything before touching persisted state: a failure here
        // must leave the corpus exactly as it was.
        let mut vectors = Vec::with_capacity(units.len());
        let mut records = Vec::with_capacity(units.len());
        for (ordinal, (source, page, text)) in units.into_iter().enumerate() {
            let vector = self
                .embedder
                .embed(&text)
                .map_err(|e| IngestError::Embedding(e.to_string()))?;
            records.push(ChunkRecord {
                id: ChunkRecord::chunk_id(&request.document_id, source, page, ordinal),
                document_id: request.document_id.clone(),
                patient_id: request.patient_id.clone(),
                source,
                page,
                text,
                file_name: request.file_name.clone(),
                embedder: self.embedder.tag().to_string(),
            });
            vectors.push(vector);
        }

        let dir = self.layout.patient_dir(&request.patient_id);
        let mut store = VectorStore::open(&dir, self.embedder.dim())?;
        store.append(vectors, records.clone())?;
        store.ensure_index_consistency()?;

        if self.use_sparse {
            // Best effort: the vector store stays authoritative if the
            // sparse index cannot keep up.
            match SparseIndex::open(dir.join(SPARSE_DIR)) {
                Ok(sparse) => {
                    let entries = records
                        .iter()
                        .map(|record| (record.id.as_str(), record.text.as_str()));
                    if let Err(err) = sparse.upsert_all(entries) {
                        tracing::warn!(
                            patient_id = %request.patient_id,
                            error = %err,
                            "sparse upsert failed"
                        );
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        patient_id = %request.patient_id,
                        error = %err,
                        "sparse index unavailable"
                    );
                }
            }
        }

        Ok(records.len())
    }
}
