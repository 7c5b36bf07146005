//! Grounding prompt construction.
//!
//! The prompt quotes each retrieved passage with its file name, source type
//! and page so the model can cite where an answer comes from. Both the
//! per-passage excerpt and the total prompt are bounded: WhatsApp-length
//! questions over small corpora must never balloon into unbounded context.

use mediserve_rag::RetrievalResult;

/// Prompt bounds.
#[derive(Debug, Clone)]
pub struct PromptConfig {
    /// Characters quoted per passage
    pub max_passage_chars: usize,
    /// Overall prompt bound
    pub max_prompt_chars: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        use mediserve_config::constants::generation;
        Self {
            max_passage_chars: generation::DEFAULT_MAX_PASSAGE_CHARS,
            max_prompt_chars: generation::DEFAULT_MAX_PROMPT_CHARS,
        }
    }
}

impl From<&mediserve_config::GenerationSettings> for PromptConfig {
    fn from(settings: &mediserve_config::GenerationSettings) -> Self {
        Self {
            max_passage_chars: settings.max_passage_chars,
            max_prompt_chars: settings.max_prompt_chars,
        }
    }
}

const HEADER: &str = "Tu es un assistant médical qui aide les patients à comprendre leurs \
documents médicaux. Utilise uniquement les extraits suivants pour répondre à la question, \
de manière claire et empathique. Si l'information n'est pas disponible dans les extraits, \
dis-le clairement et suggère de consulter le médecin.\n\nContexte médical :\n";

/// Builds grounding prompts from retrieval results.
pub struct PromptBuilder {
    config: PromptConfig,
}

impl PromptBuilder {
    pub fn new(config: PromptConfig) -> Self {
        Self { config }
    }

    /// Assemble the bounded grounding prompt for `question`.
    pub fn build(&self, question: &str, passages: &[RetrievalResult]) -> String {
        let mut prompt = String::from(HEADER);

        for passage in passages {
            let record = &passage.record;
            let file_name = record.file_name.as_deref().unwrap_or("Document");
            let excerpt = truncate_chars(&record.text, self.config.max_passage_chars);
            let line = format!(
                "- {file_name} ({}, page {}) : {excerpt}\n",
                record.source, record.page
            );
            if prompt.len() + line.len() > self.config.max_prompt_chars {
                tracing::debug!(
                    quoted = prompt.len(),
                    "prompt bound reached, dropping remaining passages"
                );
                break;
            }
            prompt.push_str(&line);
        }

        prompt.push_str("\nQuestion du patient : ");
        prompt.push_str(question);
        prompt.push_str(
            "\n\nRéponds en termes simples, sans jargon médical, et recommande de consulter \
             le médecin pour toute précision.\nRéponse :",
        );
        prompt
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(PromptConfig::default())
    }
}

/// Cut at a character boundary, appending an ellipsis when shortened.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}…")
}
