//! Answer orchestration over retrieval and generation.
//!
//! `AnswerOrchestrator` is the query-endpoint implementation: resolve the
//! patient corpus, retrieve the top passages, build the grounding prompt
//! and call the generation service, spacing calls by the configured minimum
//! interval. The messaging layer owns how failures are worded to patients;
//! here they stay typed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use uuid::Uuid;

use mediserve_config::CorpusLayout;
use mediserve_core::{QueryRequest, QueryResponse};
use mediserve_rag::{CorpusStore, HybridRetriever, RagError, RetrieveOptions};

use crate::backend::GenerationBackend;
use crate::prompt::PromptBuilder;
use crate::LlmError;

/// Query handling errors.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("no indexed corpus for patient {0}")]
    CorpusNotFound(String),

    #[error(transparent)]
    Retrieval(#[from] RagError),

    #[error(transparent)]
    Generation(#[from] LlmError),
}

impl From<QueryError> for mediserve_core::Error {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Retrieval(inner) => inner.into(),
            QueryError::Generation(inner) => inner.into(),
            other => mediserve_core::Error::Retrieval(other.to_string()),
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Fixed store dimension, shared with the ingestion side
    pub embedding_dim: usize,
    /// Open patient corpora with their sparse index
    pub use_sparse: bool,
    /// Retrieval knobs applied to every query
    pub retrieve: RetrieveOptions,
    /// Minimum spacing between generation-service calls
    pub min_call_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        use mediserve_config::constants::{generation, retrieval};
        Self {
            embedding_dim: retrieval::EMBEDDING_DIM,
            use_sparse: true,
            retrieve: RetrieveOptions::default(),
            min_call_interval: Duration::from_millis(generation::DEFAULT_MIN_CALL_INTERVAL_MS),
        }
    }
}

impl From<&mediserve_config::Settings> for OrchestratorConfig {
    fn from(settings: &mediserve_config::Settings) -> Self {
        Self {
            embedding_dim: settings.corpus.embedding_dim,
            use_sparse: settings.corpus.use_sparse,
            retrieve: RetrieveOptions::from(&settings.retrieval),
            min_call_interval: Duration::from_millis(settings.generation.min_call_interval_ms),
        }
    }
}

/// Retrieval-grounded answering for patient questions.
pub struct AnswerOrchestrator {
    retriever: Arc<HybridRetriever>,
    backend: Arc<dyn GenerationBackend>,
    prompt: PromptBuilder,
    layout: CorpusLayout,
    config: OrchestratorConfig,
    last_call: Mutex<Option<Instant>>,
}

impl AnswerOrchestrator {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        backend: Arc<dyn GenerationBackend>,
        prompt: PromptBuilder,
        layout: CorpusLayout,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            retriever,
            backend,
            prompt,
            layout,
            config,
            last_call: Mutex::new(None),
        }
    }

    /// Wire the orchestrator from application settings; retriever and
    /// backend carry the process-wide models and are injected.
    pub fn from_settings(
        settings: &mediserve_config::Settings,
        retriever: Arc<HybridRetriever>,
        backend: Arc<dyn GenerationBackend>,
    ) -> Self {
        Self::new(
            retriever,
            backend,
            PromptBuilder::new(crate::prompt::PromptConfig::from(&settings.generation)),
            CorpusLayout::from_settings(&settings.corpus),
            OrchestratorConfig::from(settings),
        )
    }

    /// Answer `question` against an already-open corpus. Returns the
    /// generated text, or an empty string when the service produced none.
    pub async fn answer(&self, corpus: &CorpusStore, question: &str) -> Result<String, QueryError> {
        let passages = self
            .retriever
            .retrieve(corpus, question, &self.config.retrieve)
            .await?;
        let prompt = self.prompt.build(question, &passages);

        self.throttle().await;
        let answer = self.backend.generate(&prompt).await?;
        Ok(answer)
    }

    /// Query-endpoint semantics: resolve the patient corpus, answer, and
    /// stamp the response with the observed latency.
    pub async fn handle_query(&self, request: QueryRequest) -> Result<QueryResponse, QueryError> {
        let started = Instant::now();

        let dir = self.layout.patient_dir(&request.patient_id);
        if !CorpusStore::exists(&dir) {
            return Err(QueryError::CorpusNotFound(request.patient_id));
        }
        let corpus = self.open_corpus(&dir, &request.patient_id)?;

        let answer = self.answer(&corpus, &request.query_text).await?;

        let session_id = if request.session_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            request.session_id
        };
        Ok(QueryResponse {
            answer_text: answer,
            patient_id: request.patient_id,
            session_id,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Open with the sparse index when configured; an unavailable sparse
    /// backend degrades the call to dense-only instead of failing it.
    fn open_corpus(&self, dir: &std::path::Path, patient_id: &str) -> Result<CorpusStore, RagError> {
        if self.config.use_sparse {
            match CorpusStore::open(dir, patient_id, self.config.embedding_dim, true) {
                Ok(corpus) => return Ok(corpus),
                Err(RagError::Configuration(err)) => {
                    tracing::warn!(
                        patient_id,
                        error = %err,
                        "sparse index unavailable, opening dense-only"
                    );
                }
                Err(other) => return Err(other),
            }
        }
        CorpusStore::open(dir, patient_id, self.config.embedding_dim, false)
    }

    /// Space out generation calls: the service enforces rate limits and
    /// burst traffic from the webhook layer must not trip them.
    async fn throttle(&self) {
        let wait = {
            let last = self.last_call.lock();
            last.map(|at| self.config.min_call_interval.saturating_sub(at.elapsed()))
                .unwrap_or(Duration::ZERO)
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        *self.last_call.lock() = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mediserve_rag::embeddings::l2_normalize;
    use mediserve_rag::TextEmbedder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct StubEmbedder;

    impl TextEmbedder for StubEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
            let mut vector = vec![0.0f32; 8];
            for (i, byte) in text.bytes().enumerate() {
                vector[(i + byte as usize) % 8] += 1.0;
            }
            l2_normalize(&mut vector);
            Ok(vector)
        }

        fn dim(&self) -> usize {
            8
        }

        fn tag(&self) -> &str {
            "stub-test"
        }
    }

    struct RecordingBackend {
        calls: AtomicUsize,
        reply: String,
    }

    #[async_trait]
    impl GenerationBackend for RecordingBackend {
        async fn generate(&self, _prompt: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }

        fn model_name(&self) -> &str {
            "recording-test"
        }
    }

    fn orchestrator(
        data_dir: &std::path::Path,
        reply: &str,
        min_interval: Duration,
    ) -> (AnswerOrchestrator, Arc<RecordingBackend>) {
        let backend = Arc::new(RecordingBackend {
            calls: AtomicUsize::new(0),
            reply: reply.to_string(),
        });
        let orchestrator = AnswerOrchestrator::new(
            Arc::new(HybridRetriever::new(Arc::new(StubEmbedder))),
            backend.clone(),
            PromptBuilder::default(),
            CorpusLayout::new(data_dir),
            OrchestratorConfig {
                embedding_dim: 8,
                use_sparse: false,
                min_call_interval: min_interval,
                ..Default::default()
            },
        );
        (orchestrator, backend)
    }

    fn seed_corpus(dir: &std::path::Path) {
        let mut store = mediserve_rag::VectorStore::open(dir, 8).unwrap();
        let embedder = StubEmbedder;
        store
            .append(
                vec![embedder.embed("tension artérielle stable").unwrap()],
                vec![mediserve_core::ChunkRecord {
                    id: "c0".to_string(),
                    document_id: "d1".to_string(),
                    patient_id: "p1".to_string(),
                    source: Default::default(),
                    page: 1,
                    text: "tension artérielle stable".to_string(),
                    file_name: Some("cr.pdf".to_string()),
                    embedder: "stub-test".to_string(),
                }],
            )
            .unwrap();
    }

    #[tokio::test]
    async fn missing_corpus_is_not_found() {
        let data = tempdir().unwrap();
        let (orchestrator, _) = orchestrator(data.path(), "réponse", Duration::ZERO);

        let err = orchestrator
            .handle_query(QueryRequest {
                patient_id: "absent".to_string(),
                query_text: "ma tension ?".to_string(),
                session_id: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::CorpusNotFound(_)));
    }

    #[tokio::test]
    async fn query_returns_answer_and_latency() {
        let data = tempdir().unwrap();
        seed_corpus(&data.path().join("patient_p1"));
        let (orchestrator, backend) = orchestrator(data.path(), "Votre tension est stable.", Duration::ZERO);

        let response = orchestrator
            .handle_query(QueryRequest {
                patient_id: "p1".to_string(),
                query_text: "ma tension ?".to_string(),
                session_id: "s1".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(response.answer_text, "Votre tension est stable.");
        assert_eq!(response.patient_id, "p1");
        assert_eq!(response.session_id, "s1");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_session_id_gets_generated() {
        let data = tempdir().unwrap();
        seed_corpus(&data.path().join("patient_p1"));
        let (orchestrator, _) = orchestrator(data.path(), "ok", Duration::ZERO);

        let response = orchestrator
            .handle_query(QueryRequest {
                patient_id: "p1".to_string(),
                query_text: "question".to_string(),
                session_id: String::new(),
            })
            .await
            .unwrap();
        assert!(!response.session_id.is_empty());
    }

    #[tokio::test]
    async fn empty_generation_yields_empty_answer() {
        let data = tempdir().unwrap();
        seed_corpus(&data.path().join("patient_p1"));
        let (orchestrator, _) = orchestrator(data.path(), "", Duration::ZERO);

        let response = orchestrator
            .handle_query(QueryRequest {
                patient_id: "p1".to_string(),
                query_text: "question".to_string(),
                session_id: "s1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(response.answer_text, "");
    }

    #[tokio::test]
    async fn consecutive_calls_are_spaced() {
        let data = tempdir().unwrap();
        seed_corpus(&data.path().join("patient_p1"));
        let interval = Duration::from_millis(50);
        let (orchestrator, _) = orchestrator(data.path(), "ok", interval);

        let request = QueryRequest {
            patient_id: "p1".to_string(),
            query_text: "question".to_string(),
            session_id: "s1".to_string(),
        };

        let started = Instant::now();
        orchestrator.handle_query(request.clone()).await.unwrap();
        orchestrator.handle_query(request).await.unwrap();
        assert!(started.elapsed() >= interval);
    }
}
