//! End-to-end ingestion behavior: idempotent re-ingestion, failure
//! isolation and the all-or-nothing persistence rule.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use mediserve_config::CorpusLayout;
use mediserve_core::{IngestRequest, IngestStatus};
use mediserve_ingest::{Chunker, ChunkingConfig, ExtractionConfig, IndexingPipeline, TextExtractor};
use mediserve_rag::{CorpusStore, RagError, TextEmbedder, VectorStore};
use tempfile::tempdir;

const DIM: usize = 8;

struct StubEmbedder;

impl TextEmbedder for StubEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let mut vector = vec![0.0f32; DIM];
        for (i, byte) in text.bytes().enumerate() {
            vector[(i + byte as usize) % DIM] += 1.0;
        }
        mediserve_rag::embeddings::l2_normalize(&mut vector);
        Ok(vector)
    }

    fn dim(&self) -> usize {
        DIM
    }

    fn tag(&self) -> &str {
        "stub-test"
    }
}

/// Fails after a configurable number of successful embeddings.
struct FlakyEmbedder {
    calls: AtomicUsize,
    fail_after: usize,
}

impl TextEmbedder for FlakyEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call >= self.fail_after {
            return Err(RagError::Embedding("embedding backend down".into()));
        }
        StubEmbedder.embed(text)
    }

    fn dim(&self) -> usize {
        DIM
    }

    fn tag(&self) -> &str {
        "flaky-test"
    }
}

fn pipeline_with(
    data_dir: &std::path::Path,
    embedder: Arc<dyn TextEmbedder>,
    use_sparse: bool,
) -> IndexingPipeline {
    IndexingPipeline::new(
        CorpusLayout::new(data_dir),
        TextExtractor::new(ExtractionConfig::default()),
        Chunker::new(ChunkingConfig {
            chunk_size: 8,
            overlap: 2,
            ..Default::default()
        }),
        embedder,
        use_sparse,
    )
}

fn write_document(dir: &std::path::Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn request(document_id: &str, patient_id: &str, path: &std::path::Path) -> IngestRequest {
    IngestRequest {
        document_id: document_id.to_string(),
        patient_id: patient_id.to_string(),
        file_path: path.to_path_buf(),
        file_type: "txt".to_string(),
        file_name: Some("compte_rendu.txt".to_string()),
    }
}

#[tokio::test]
async fn ingest_indexes_document_chunks() {
    let docs = tempdir().unwrap();
    let data = tempdir().unwrap();
    let path = write_document(
        docs.path(),
        "cr.txt",
        "Le patient présente une tension artérielle stable. \
         Le traitement antihypertenseur est reconduit pour trois mois. \
         Un contrôle biologique est prévu au prochain trimestre.",
    );

    let pipeline = pipeline_with(data.path(), Arc::new(StubEmbedder), true);
    let outcome = pipeline.ingest_document(&request("d1", "p1", &path)).await;

    assert_eq!(outcome.status, IngestStatus::Indexed);
    assert!(outcome.chunks_indexed > 0);
    assert!(outcome.error_message.is_none());

    let corpus = CorpusStore::open(data.path().join("patient_p1"), "p1", DIM, true).unwrap();
    assert_eq!(corpus.vectors.len(), outcome.chunks_indexed);
    assert_eq!(
        corpus.sparse.as_ref().unwrap().doc_count(),
        outcome.chunks_indexed as u64
    );
    assert!(corpus.vectors.records().iter().all(|r| r.embedder == "stub-test"));
}

// Scenario E: re-ingesting the identical document changes nothing.
#[tokio::test]
async fn reingesting_same_document_is_idempotent() {
    let docs = tempdir().unwrap();
    let data = tempdir().unwrap();
    let path = write_document(
        docs.path(),
        "cr.txt",
        "Résultats d'analyse sanguine du mois de mars. \
         La glycémie à jeun reste dans les valeurs de référence.",
    );

    let pipeline = pipeline_with(data.path(), Arc::new(StubEmbedder), true);
    let req = request("d1", "p1", &path);

    let first = pipeline.ingest_document(&req).await;
    assert_eq!(first.status, IngestStatus::Indexed);
    let corpus = CorpusStore::open(data.path().join("patient_p1"), "p1", DIM, true).unwrap();
    let count_after_first = corpus.vectors.len();
    let ids_after_first: Vec<String> = corpus
        .vectors
        .records()
        .iter()
        .map(|r| r.id.clone())
        .collect();
    let texts_after_first: Vec<String> = corpus
        .vectors
        .records()
        .iter()
        .map(|r| r.text.clone())
        .collect();
    drop(corpus);

    let second = pipeline.ingest_document(&req).await;
    assert_eq!(second.status, IngestStatus::Indexed);

    let corpus = CorpusStore::open(data.path().join("patient_p1"), "p1", DIM, true).unwrap();
    assert_eq!(corpus.vectors.len(), count_after_first);
    let ids: Vec<String> = corpus
        .vectors
        .records()
        .iter()
        .map(|r| r.id.clone())
        .collect();
    let texts: Vec<String> = corpus
        .vectors
        .records()
        .iter()
        .map(|r| r.text.clone())
        .collect();
    assert_eq!(ids, ids_after_first);
    assert_eq!(texts, texts_after_first);
    assert_eq!(
        corpus.sparse.as_ref().unwrap().doc_count(),
        count_after_first as u64
    );
}

#[tokio::test]
async fn embedding_failure_leaves_corpus_untouched() {
    let docs = tempdir().unwrap();
    let data = tempdir().unwrap();
    let first_doc = write_document(docs.path(), "a.txt", "Premier compte rendu du patient.");
    let second_doc = write_document(docs.path(), "b.txt", "Deuxième compte rendu du patient.");

    let pipeline = pipeline_with(data.path(), Arc::new(StubEmbedder), false);
    let outcome = pipeline.ingest_document(&request("d1", "p1", &first_doc)).await;
    assert_eq!(outcome.status, IngestStatus::Indexed);
    let baseline = outcome.chunks_indexed;

    // Second ingest fails mid-embedding: the persisted corpus must not move.
    let flaky = pipeline_with(
        data.path(),
        Arc::new(FlakyEmbedder {
            calls: AtomicUsize::new(0),
            fail_after: 0,
        }),
        false,
    );
    let outcome = flaky.ingest_document(&request("d2", "p1", &second_doc)).await;
    assert_eq!(outcome.status, IngestStatus::Failed);
    assert!(outcome.error_message.unwrap().contains("embedding"));

    let store = VectorStore::open(data.path().join("patient_p1"), DIM).unwrap();
    assert_eq!(store.len(), baseline);
    assert!(store.records().iter().all(|r| r.document_id == "d1"));
}

#[tokio::test]
async fn unsupported_format_is_reported_not_thrown() {
    let docs = tempdir().unwrap();
    let data = tempdir().unwrap();
    let path = write_document(docs.path(), "x.docx", "peu importe");

    let pipeline = pipeline_with(data.path(), Arc::new(StubEmbedder), false);
    let mut req = request("d1", "p1", &path);
    req.file_type = "docx".to_string();

    let outcome = pipeline.ingest_document(&req).await;
    assert_eq!(outcome.status, IngestStatus::Failed);
    assert!(outcome.error_message.unwrap().contains("docx"));
}

#[tokio::test]
async fn missing_file_is_reported() {
    let data = tempdir().unwrap();
    let pipeline = pipeline_with(data.path(), Arc::new(StubEmbedder), false);
    let req = request("d1", "p1", std::path::Path::new("/nonexistent/cr.txt"));

    let outcome = pipeline.ingest_document(&req).await;
    assert_eq!(outcome.status, IngestStatus::Failed);
    assert!(outcome.error_message.unwrap().contains("file not found"));
}

#[tokio::test]
async fn empty_document_is_reported() {
    let docs = tempdir().unwrap();
    let data = tempdir().unwrap();
    let path = write_document(docs.path(), "vide.txt", "   \n   ");

    let pipeline = pipeline_with(data.path(), Arc::new(StubEmbedder), false);
    let outcome = pipeline.ingest_document(&request("d1", "p1", &path)).await;
    assert_eq!(outcome.status, IngestStatus::Failed);
    assert!(outcome
        .error_message
        .unwrap()
        .contains("no text extracted"));
}

#[tokio::test]
async fn batch_continues_past_failing_documents() {
    let docs = tempdir().unwrap();
    let data = tempdir().unwrap();
    let good = write_document(docs.path(), "bon.txt", "Vaccination à jour.");
    let empty = write_document(docs.path(), "vide.txt", "");
    let good_after = write_document(docs.path(), "suite.txt", "Prochain rendez-vous fixé.");

    let pipeline = pipeline_with(data.path(), Arc::new(StubEmbedder), false);
    let outcomes = pipeline
        .ingest_batch(&[
            request("d1", "p1", &good),
            request("d2", "p1", &empty),
            request("d3", "p2", &good_after),
        ])
        .await;

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0].status, IngestStatus::Indexed);
    assert_eq!(outcomes[1].status, IngestStatus::Failed);
    assert_eq!(outcomes[2].status, IngestStatus::Indexed);

    // Both patients got their own corpus directory.
    assert!(data.path().join("patient_p1").join("vectors.json").exists());
    assert!(data.path().join("patient_p2").join("vectors.json").exists());
}

#[tokio::test]
async fn two_documents_accumulate_in_one_corpus() {
    let docs = tempdir().unwrap();
    let data = tempdir().unwrap();
    let first = write_document(docs.path(), "a.txt", "Compte rendu de janvier.");
    let second = write_document(docs.path(), "b.txt", "Compte rendu de février.");

    let pipeline = pipeline_with(data.path(), Arc::new(StubEmbedder), false);
    let one = pipeline.ingest_document(&request("d1", "p1", &first)).await;
    let two = pipeline.ingest_document(&request("d2", "p1", &second)).await;

    let store = VectorStore::open(data.path().join("patient_p1"), DIM).unwrap();
    assert_eq!(store.len(), one.chunks_indexed + two.chunks_indexed);
}
