//! Answer orchestration for the MediServe retrieval service
//!
//! Given a patient question, retrieves the top passages from the patient's
//! corpus, builds a bounded grounding prompt quoting each passage with its
//! source type and page, and delegates to the external generation service.
//! The service is an opaque text-in/text-out function behind
//! `GenerationBackend`; an empty completion is an empty answer, not an
//! error.

pub mod backend;
pub mod orchestrator;
pub mod prompt;

pub use backend::{GenerationBackend, GenerationConfig, HttpBackend};
pub use orchestrator::{AnswerOrchestrator, OrchestratorConfig, QueryError};
pub use prompt::{PromptBuilder, PromptConfig};

use thiserror::Error;

/// Generation-layer errors.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("api error: {0}")]
    Api(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for mediserve_core::Error {
    fn from(err: LlmError) -> Self {
        mediserve_core::Error::Generation(err.to_string())
    }
}
