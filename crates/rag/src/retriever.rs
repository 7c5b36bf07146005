//! Hybrid Retriever
//!
//! Combines dense and sparse search over one patient corpus: both searches
//! fan out concurrently, hits merge by chunk id, each score column is
//! normalized by its own maximum, and the fused score is the alpha-weighted
//! sum. Reranking, when enabled, rescores the top candidates in a single
//! batched cross-encoder call.
//!
//! Failure semantics: an embedding failure is fatal to the call; a sparse
//! failure or absence degrades to dense-only; an unavailable reranker keeps
//! the fused order. A score column whose maximum is exactly zero is left at
//! zero and logged as a degraded signal, never divided.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mediserve_core::ChunkRecord;

use crate::corpus::CorpusStore;
use crate::embeddings::TextEmbedder;
use crate::reranker::PassageScorer;
use crate::vector_store::VectorStore;
use crate::RagError;

/// Per-call retrieval knobs.
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    /// Final number of results
    pub top_k: usize,
    /// Candidates drawn from dense search
    pub dense_k: usize,
    /// Candidates drawn from sparse search
    pub sparse_k: usize,
    /// Weight of the dense column in fusion (0.0 - 1.0)
    pub alpha: f32,
    /// Rerank the fused candidates with the configured scorer
    pub rerank: bool,
    /// Per-call deadline; embedding and reranking are model-bound
    pub deadline: Option<Duration>,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        use mediserve_config::constants::retrieval;
        Self {
            top_k: retrieval::DEFAULT_TOP_K,
            dense_k: retrieval::DEFAULT_DENSE_K,
            sparse_k: retrieval::DEFAULT_SPARSE_K,
            alpha: retrieval::DEFAULT_ALPHA,
            rerank: false,
            deadline: None,
        }
    }
}

impl From<&mediserve_config::RetrievalSettings> for RetrieveOptions {
    fn from(settings: &mediserve_config::RetrievalSettings) -> Self {
        Self {
            top_k: settings.top_k,
            dense_k: settings.dense_k,
            sparse_k: settings.sparse_k,
            alpha: settings.alpha,
            rerank: settings.rerank,
            deadline: settings.deadline_ms.map(Duration::from_millis),
        }
    }
}

/// One ranked passage.
///
/// `dense_score` and `sparse_score` are the normalized column values; an id
/// absent from one side carries 0.0 for it.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub record: ChunkRecord,
    pub dense_score: f32,
    pub sparse_score: f32,
    pub fused_score: f32,
    pub rerank_score: Option<f32>,
}

/// Hybrid retriever over a patient corpus.
pub struct HybridRetriever {
    embedder: Arc<dyn TextEmbedder>,
    scorer: Option<Arc<dyn PassageScorer>>,
}

impl HybridRetriever {
    pub fn new(embedder: Arc<dyn TextEmbedder>) -> Self {
        Self {
            embedder,
            scorer: None,
        }
    }

    /// Attach a cross-encoder scorer used when `rerank` is requested.
    pub fn with_scorer(mut self, scorer: Arc<dyn PassageScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Retrieve the top passages for `query` from `corpus`.
    pub async fn retrieve(
        &self,
        corpus: &CorpusStore,
        query: &str,
        options: &RetrieveOptions,
    ) -> Result<Vec<RetrievalResult>, RagError> {
        match options.deadline {
            Some(deadline) => tokio::time::timeout(deadline, self.retrieve_inner(corpus, query, options))
                .await
                .map_err(|_| RagError::Timeout)?,
            None => self.retrieve_inner(corpus, query, options).await,
        }
    }

    async fn retrieve_inner(
        &self,
        corpus: &CorpusStore,
        query: &str,
        options: &RetrieveOptions,
    ) -> Result<Vec<RetrievalResult>, RagError> {
        // Embedding is model-bound; keep it off the async workers so the
        // deadline can actually interrupt the call.
        let embedder = Arc::clone(&self.embedder);
        let query_owned = query.to_string();
        let query_vector = tokio::task::spawn_blocking(move || embedder.embed(&query_owned))
            .await
            .map_err(|e| RagError::Embedding(format!("embedding task failed: {e}")))??;

        let (dense, sparse_hits) = tokio::join!(
            async { corpus.vectors.search(&query_vector, options.dense_k) },
            async {
                match &corpus.sparse {
                    Some(index) => match index.search(query, options.sparse_k) {
                        Ok(hits) => hits,
                        Err(err) => {
                            tracing::warn!(
                                patient_id = corpus.patient_id(),
                                error = %err,
                                "sparse search failed, degrading to dense-only"
                            );
                            Vec::new()
                        }
                    },
                    None => Vec::new(),
                }
            }
        );
        let dense_hits = dense?;

        let mut hits = merge_hits(&dense_hits, &sparse_hits, &corpus.vectors);
        normalize_scores(&mut hits);
        fuse_scores(&mut hits, options.alpha);
        sort_by_fused(&mut hits);

        if options.rerank {
            self.rerank(query, &mut hits, options.top_k);
        }

        hits.truncate(options.top_k);
        Ok(hits)
    }

    /// Replace the fused score of the top `2k` candidates with the
    /// cross-encoder score, in one batched call. Any scorer failure keeps
    /// the fused order.
    fn rerank(&self, query: &str, hits: &mut Vec<RetrievalResult>, top_k: usize) {
        let Some(scorer) = &self.scorer else {
            tracing::warn!("reranking requested but no scorer configured, keeping fused order");
            return;
        };

        let take = (top_k * 2).min(hits.len());
        if take == 0 {
            return;
        }
        let passages: Vec<&str> = hits[..take].iter().map(|h| h.record.text.as_str()).collect();

        match scorer.score_batch(query, &passages) {
            Ok(scores) => {
                for (hit, score) in hits[..take].iter_mut().zip(scores) {
                    hit.rerank_score = Some(score);
                    hit.fused_score = score;
                }
                sort_by_fused(hits);
            }
            Err(err) => {
                tracing::warn!(error = %err, "reranker unavailable, keeping fused order");
            }
        }
    }
}

/// Merge dense and sparse hits by chunk id into one candidate per id. A
/// side that did not return an id contributes 0.0 for its column. Sparse
/// hits resolve their metadata through the store's id→record snapshot;
/// sparse ids unknown to the snapshot are dropped (the sparse index lags
/// the store at worst).
pub fn merge_hits(
    dense_hits: &[(String, f32)],
    sparse_hits: &[(String, f32)],
    store: &VectorStore,
) -> Vec<RetrievalResult> {
    let mut combined: HashMap<&str, RetrievalResult> = HashMap::new();

    for (id, score) in dense_hits {
        let Some(record) = store.record(id) else {
            continue;
        };
        combined.insert(
            id.as_str(),
            RetrievalResult {
                record: record.clone(),
                dense_score: *score,
                sparse_score: 0.0,
                fused_score: 0.0,
                rerank_score: None,
            },
        );
    }

    for (id, score) in sparse_hits {
        if let Some(hit) = combined.get_mut(id.as_str()) {
            hit.sparse_score = *score;
        } else if let Some(record) = store.record(id) {
            combined.insert(
                id.as_str(),
                RetrievalResult {
                    record: record.clone(),
                    dense_score: 0.0,
                    sparse_score: *score,
                    fused_score: 0.0,
                    rerank_score: None,
                },
            );
        }
    }

    let mut hits: Vec<RetrievalResult> = combined.into_values().collect();
    hits.sort_by(|a, b| a.record.id.cmp(&b.record.id));
    hits
}

/// Divide each score column by its own maximum. A column whose maximum is
/// exactly zero keeps its zeros and the degraded signal is logged; it is
/// never divided.
pub fn normalize_scores(hits: &mut [RetrievalResult]) {
    if hits.is_empty() {
        return;
    }

    let max_dense = hits.iter().map(|h| h.dense_score).fold(0.0f32, f32::max);
    if max_dense > 0.0 {
        for hit in hits.iter_mut() {
            hit.dense_score /= max_dense;
        }
    } else {
        tracing::warn!("all dense scores are zero, skipping dense normalization");
    }

    let max_sparse = hits.iter().map(|h| h.sparse_score).fold(0.0f32, f32::max);
    if max_sparse > 0.0 {
        for hit in hits.iter_mut() {
            hit.sparse_score /= max_sparse;
        }
    } else {
        tracing::warn!("all sparse scores are zero, skipping sparse normalization");
    }
}

/// Weighted sum of the normalized columns:
/// `fused = alpha * dense + (1 - alpha) * sparse`.
pub fn fuse_scores(hits: &mut [RetrievalResult], alpha: f32) {
    for hit in hits.iter_mut() {
        hit.fused_score = alpha * hit.dense_score + (1.0 - alpha) * hit.sparse_score;
    }
}

fn sort_by_fused(hits: &mut [RetrievalResult]) {
    hits.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
}
