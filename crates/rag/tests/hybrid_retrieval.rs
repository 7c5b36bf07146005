//! End-to-end retrieval behavior over a small patient corpus: fusion,
//! degradation paths and reranking.

use std::sync::Arc;

use mediserve_core::{ChunkRecord, SourceType};
use mediserve_rag::retriever::merge_hits;
use mediserve_rag::{
    CorpusStore, HybridRetriever, LexicalScorer, RagError, RetrieveOptions, TextEmbedder,
};
use tempfile::tempdir;

/// One-hot embedder over a tiny vocabulary: a text maps onto the axes of
/// the vocabulary words it contains, which makes similarity fully
/// predictable in tests.
struct KeywordEmbedder {
    vocab: Vec<&'static str>,
}

impl KeywordEmbedder {
    fn new() -> Self {
        Self {
            vocab: vec![
                "glycémie",
                "tension",
                "cholestérol",
                "radiographie",
                "vaccin",
                "ordonnance",
                "scanner",
                "allergie",
            ],
        }
    }
}

impl TextEmbedder for KeywordEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let lower = text.to_lowercase();
        let mut vector = vec![0.0f32; self.vocab.len()];
        for (axis, word) in self.vocab.iter().enumerate() {
            if lower.contains(word) {
                vector[axis] = 1.0;
            }
        }
        mediserve_rag::embeddings::l2_normalize(&mut vector);
        Ok(vector)
    }

    fn dim(&self) -> usize {
        self.vocab.len()
    }

    fn tag(&self) -> &str {
        "keyword-test"
    }
}

/// Embeds everything to the zero vector: every dense score degenerates to 0.
struct ZeroEmbedder {
    dim: usize,
}

impl TextEmbedder for ZeroEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, RagError> {
        Ok(vec![0.0; self.dim])
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn tag(&self) -> &str {
        "zero-test"
    }
}

struct FailingEmbedder;

impl TextEmbedder for FailingEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, RagError> {
        Err(RagError::Embedding("model crashed".into()))
    }

    fn dim(&self) -> usize {
        8
    }

    fn tag(&self) -> &str {
        "failing-test"
    }
}

fn record(id: &str, text: &str) -> ChunkRecord {
    ChunkRecord {
        id: id.to_string(),
        document_id: "doc1".to_string(),
        patient_id: "patient1".to_string(),
        source: SourceType::Text,
        page: 1,
        text: text.to_string(),
        file_name: Some("dossier.pdf".to_string()),
        embedder: "keyword-test".to_string(),
    }
}

/// Three-chunk corpus; `with_sparse` controls whether the BM25 side exists.
fn build_corpus(
    dir: &std::path::Path,
    embedder: &dyn TextEmbedder,
    with_sparse: bool,
) -> CorpusStore {
    let texts = [
        ("c0", "glycémie à jeun dans les normes"),
        ("c1", "tension artérielle légèrement élevée"),
        ("c2", "cholestérol total au-dessus du seuil"),
    ];

    let mut corpus = CorpusStore::open(dir, "patient1", embedder.dim(), with_sparse).unwrap();
    let vectors = texts
        .iter()
        .map(|(_, text)| embedder.embed(text).unwrap())
        .collect();
    let records = texts.iter().map(|(id, text)| record(id, text)).collect();
    corpus.vectors.append(vectors, records).unwrap();
    if let Some(sparse) = &corpus.sparse {
        sparse
            .upsert_all(texts.iter().map(|(id, text)| (*id, *text)))
            .unwrap();
    }
    corpus
}

// Scenario A: dense-only corpus, query closest to one chunk.
#[tokio::test]
async fn dense_only_returns_closest_chunk_first() {
    let dir = tempdir().unwrap();
    let embedder = Arc::new(KeywordEmbedder::new());
    let corpus = build_corpus(dir.path(), embedder.as_ref(), false);

    let retriever = HybridRetriever::new(embedder);
    let results = retriever
        .retrieve(&corpus, "quel est mon cholestérol ?", &RetrieveOptions::default())
        .await
        .unwrap();

    assert_eq!(results[0].record.id, "c2");
    assert!(results.iter().all(|r| r.sparse_score == 0.0));
    assert!(results[0].fused_score > 0.0);
}

// Scenario B: an id surfaced only by sparse search still joins the results
// with a zero dense score, resolved through the corpus id map.
#[tokio::test]
async fn sparse_only_hit_joins_with_zero_dense_score() {
    let dir = tempdir().unwrap();
    let embedder = Arc::new(KeywordEmbedder::new());
    let corpus = build_corpus(dir.path(), embedder.as_ref(), true);

    let retriever = HybridRetriever::new(embedder);
    let options = RetrieveOptions {
        dense_k: 1,
        ..Default::default()
    };
    // Dense side can only surface one chunk; "tension" plus "cholestérol"
    // guarantees the other matching chunk arrives through BM25 alone.
    let results = retriever
        .retrieve(&corpus, "tension cholestérol", &options)
        .await
        .unwrap();

    let ids: Vec<&str> = results.iter().map(|r| r.record.id.as_str()).collect();
    assert!(ids.contains(&"c1"));
    assert!(ids.contains(&"c2"));
    let sparse_only = results
        .iter()
        .find(|r| r.dense_score == 0.0 && r.sparse_score > 0.0)
        .expect("one chunk should come from the sparse side only");
    assert!(sparse_only.sparse_score > 0.0);
}

// Scenario C: degenerate embeddings zero out the dense column; retrieval
// still returns results and no error surfaces.
#[tokio::test]
async fn zero_dense_signal_degrades_without_error() {
    let dir = tempdir().unwrap();
    let embedder = Arc::new(ZeroEmbedder { dim: 8 });
    let corpus = build_corpus(dir.path(), embedder.as_ref(), true);

    let retriever = HybridRetriever::new(embedder);
    let options = RetrieveOptions {
        top_k: 3,
        ..Default::default()
    };
    let results = retriever
        .retrieve(&corpus, "tension artérielle", &options)
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.dense_score == 0.0));
    assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.sparse_score)));
}

// Scenario D: reranking over a corpus containing an empty-text chunk.
#[tokio::test]
async fn reranking_survives_empty_candidate_text() {
    let dir = tempdir().unwrap();
    let embedder = Arc::new(KeywordEmbedder::new());
    let mut corpus = build_corpus(dir.path(), embedder.as_ref(), false);
    corpus
        .vectors
        .append(
            vec![embedder.embed("scanner").unwrap()],
            vec![record("c3", "")],
        )
        .unwrap();

    let retriever = HybridRetriever::new(embedder).with_scorer(Arc::new(LexicalScorer));
    let options = RetrieveOptions {
        rerank: true,
        top_k: 4,
        ..Default::default()
    };
    let results = retriever
        .retrieve(&corpus, "résultat du scanner", &options)
        .await
        .unwrap();

    assert!(!results.is_empty());
    let empty = results.iter().find(|r| r.record.id == "c3").unwrap();
    assert_eq!(empty.rerank_score, Some(0.0));
}

#[tokio::test]
async fn embedding_failure_is_fatal() {
    let dir = tempdir().unwrap();
    let seed = KeywordEmbedder::new();
    let corpus = build_corpus(dir.path(), &seed, false);

    let retriever = HybridRetriever::new(Arc::new(FailingEmbedder));
    let err = retriever
        .retrieve(&corpus, "glycémie", &RetrieveOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Embedding(_)));
}

#[tokio::test]
async fn results_default_source_type_to_text() {
    let dir = tempdir().unwrap();
    let embedder = Arc::new(KeywordEmbedder::new());
    let corpus = build_corpus(dir.path(), embedder.as_ref(), false);

    let retriever = HybridRetriever::new(embedder);
    let results = retriever
        .retrieve(&corpus, "glycémie", &RetrieveOptions::default())
        .await
        .unwrap();
    assert_eq!(results[0].record.source, SourceType::Text);
}

#[tokio::test]
async fn normalized_columns_stay_in_unit_interval() {
    let dir = tempdir().unwrap();
    let embedder = Arc::new(KeywordEmbedder::new());
    let corpus = build_corpus(dir.path(), embedder.as_ref(), true);

    let retriever = HybridRetriever::new(embedder);
    let results = retriever
        .retrieve(&corpus, "glycémie tension", &RetrieveOptions::default())
        .await
        .unwrap();

    assert!(!results.is_empty());
    for result in &results {
        assert!((0.0..=1.0).contains(&result.dense_score));
        assert!((0.0..=1.0).contains(&result.sparse_score));
    }
    let max_dense = results.iter().map(|r| r.dense_score).fold(0.0f32, f32::max);
    assert!((max_dense - 1.0).abs() < 1e-6);
}

// Merge completeness: every id from either side appears exactly once, with
// 0.0 filled in for the missing column.
#[test]
fn merge_covers_both_sides_exactly_once() {
    let dir = tempdir().unwrap();
    let embedder = KeywordEmbedder::new();
    let corpus = build_corpus(dir.path(), &embedder, false);

    let dense = vec![("c0".to_string(), 0.9), ("c1".to_string(), 0.4)];
    let sparse = vec![("c1".to_string(), 3.0), ("c2".to_string(), 2.0)];

    let merged = merge_hits(&dense, &sparse, &corpus.vectors);
    assert_eq!(merged.len(), 3);

    let mut ids: Vec<&str> = merged.iter().map(|m| m.record.id.as_str()).collect();
    ids.dedup();
    assert_eq!(ids, vec!["c0", "c1", "c2"]);

    let c0 = merged.iter().find(|m| m.record.id == "c0").unwrap();
    assert_eq!(c0.sparse_score, 0.0);
    let c1 = merged.iter().find(|m| m.record.id == "c1").unwrap();
    assert_eq!((c1.dense_score, c1.sparse_score), (0.4, 3.0));
    let c2 = merged.iter().find(|m| m.record.id == "c2").unwrap();
    assert_eq!(c2.dense_score, 0.0);
}

#[test]
fn merge_drops_sparse_ids_unknown_to_snapshot() {
    let dir = tempdir().unwrap();
    let embedder = KeywordEmbedder::new();
    let corpus = build_corpus(dir.path(), &embedder, false);

    let sparse = vec![("ghost".to_string(), 5.0), ("c0".to_string(), 1.0)];
    let merged = merge_hits(&[], &sparse, &corpus.vectors);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].record.id, "c0");
}

#[tokio::test]
async fn deadline_zero_times_out() {
    let dir = tempdir().unwrap();
    let embedder = Arc::new(KeywordEmbedder::new());
    let corpus = build_corpus(dir.path(), embedder.as_ref(), false);

    let retriever = HybridRetriever::new(embedder);
    let options = RetrieveOptions {
        deadline: Some(std::time::Duration::ZERO),
        ..Default::default()
    };
    let err = retriever
        .retrieve(&corpus, "glycémie", &options)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Timeout));
}
