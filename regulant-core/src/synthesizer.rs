//! Answer synthesis stage.
//!
//! Builds a structured, cited draft answer from a question and a ranked
//! evidence set with a single low-temperature generation call. The system
//! prompt pins the answer to the supplied documents and the required section
//! structure; a deduplicated source list is appended after generation.

use crate::config::SynthesisConfig;
use crate::error::LlmError;
use crate::llm::LlmProvider;
use crate::types::{DraftAnswer, EvidenceChunk, Message};
use std::sync::Arc;
use tracing::{debug, info};

const SYSTEM_PROMPT: &str = "You are a regulatory expert assistant.
Your task is to provide comprehensive, accurate answers to regulatory questions about medical devices based on the provided regulatory documents.
IMPORTANT GUIDELINES:
1. Base your answer ONLY on the provided regulatory documents
2. Provide a structured response with clear sections
3. Include specific citations for each major point
4. If the documents don't contain enough information, clearly state this
5. Use professional, technical language appropriate for regulatory context
6. Highlight key requirements, processes, or standards mentioned
7. Compare FDA vs WHO approaches when relevant

RESPONSE STRUCTURE:
- ## Executive Summary (brief overview)
- ## Detailed Analysis (main content with citations)
- ## Key Requirements/Standards (if applicable)
- ## Sources (list all referenced documents)

Use citation format: [Source Name, Page X] after each major point.";

/// Answer synthesizer over an LLM provider.
pub struct Synthesizer {
    provider: Arc<dyn LlmProvider>,
    config: SynthesisConfig,
}

impl Synthesizer {
    pub fn new(provider: Arc<dyn LlmProvider>, config: SynthesisConfig) -> Self {
        Self { provider, config }
    }

    /// Format the evidence set into the context block for the prompt, one
    /// labeled section per chunk.
    fn build_context(evidence: &[EvidenceChunk]) -> String {
        let sections: Vec<String> = evidence
            .iter()
            .map(|chunk| {
                format!(
                    "Source: {}\nContent: {}\nDocument Type: {}",
                    chunk.source_ref(),
                    chunk.content,
                    chunk.doc_type
                )
            })
            .collect();
        sections.join("\n---\n")
    }

    /// Deduplicated `(source, page)` references in first-seen order.
    fn collect_sources(evidence: &[EvidenceChunk]) -> Vec<String> {
        let mut sources = Vec::new();
        for chunk in evidence {
            let source_ref = chunk.source_ref();
            if !sources.contains(&source_ref) {
                sources.push(source_ref);
            }
        }
        sources
    }

    /// Synthesize a cited draft answer for the question from the evidence.
    ///
    /// Idempotent for fixed evidence at temperature 0: the caller may retry
    /// on failure or surface the error.
    pub async fn synthesize(
        &self,
        question: &str,
        evidence: &[EvidenceChunk],
    ) -> Result<DraftAnswer, LlmError> {
        let context = Self::build_context(evidence);
        let user_prompt = format!(
            "Regulatory Question: {}\n\nAvailable Regulatory Information:\n{}\n\nPlease provide a comprehensive, structured answer based on the regulatory documents provided above.",
            question, context
        );

        debug!(
            evidence_chunks = evidence.len(),
            context_chars = context.len(),
            "Synthesizing answer"
        );

        let request = crate::types::CompletionRequest {
            messages: vec![Message::system(SYSTEM_PROMPT), Message::user(user_prompt)],
            temperature: self.config.temperature,
            max_tokens: Some(self.config.max_tokens),
            ..Default::default()
        };

        let response = self.provider.complete(request).await?;

        let mut text = response.content.trim().to_string();
        let sources = Self::collect_sources(evidence);
        if !sources.is_empty() {
            // A heading keeps the appendix out of claim extraction.
            text.push_str("\n\n## Sources Referenced\n");
            for source in &sources {
                text.push_str(&format!("- {}\n", source));
            }
        }

        info!(
            model = %response.model,
            output_tokens = response.usage.output_tokens,
            "Draft answer synthesized"
        );

        Ok(DraftAnswer {
            text,
            model: response.model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::StaticIndex;
    use crate::llm::MockLlmProvider;
    use crate::types::Role;

    fn evidence() -> Vec<EvidenceChunk> {
        vec![
            StaticIndex::chunk(
                "Design controls govern software validation.",
                "FDA_Guidance.pdf",
                4,
                0.9,
            ),
            StaticIndex::chunk(
                "Validation evidence must be documented.",
                "FDA_Guidance.pdf",
                9,
                0.8,
            ),
            StaticIndex::chunk(
                "Quality systems require process validation.",
                "WHO_GMP.pdf",
                2,
                0.7,
            ),
        ]
    }

    #[tokio::test]
    async fn test_synthesize_builds_labeled_context() {
        let mock = Arc::new(MockLlmProvider::with_response("## Executive Summary\nOk."));
        let synthesizer = Synthesizer::new(mock.clone(), SynthesisConfig::default());
        synthesizer
            .synthesize("What are design controls?", &evidence())
            .await
            .unwrap();

        let requests = mock.recorded_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages[0].role, Role::System);
        let user = &requests[0].messages[1].content;
        assert!(user.contains("Regulatory Question: What are design controls?"));
        assert!(user.contains("Source: FDA_Guidance.pdf (Page: 4)"));
        assert!(user.contains("Document Type: fda"));
        assert!(user.contains("Document Type: who"));
        assert!(user.contains("\n---\n"));
    }

    #[tokio::test]
    async fn test_synthesize_uses_configured_sampling() {
        let mock = Arc::new(MockLlmProvider::with_response("answer"));
        let config = SynthesisConfig {
            temperature: 0.0,
            max_tokens: 900,
        };
        let synthesizer = Synthesizer::new(mock.clone(), config);
        synthesizer.synthesize("fda question", &[]).await.unwrap();

        let request = &mock.recorded_requests()[0];
        assert_eq!(request.temperature, 0.0);
        assert_eq!(request.max_tokens, Some(900));
    }

    #[tokio::test]
    async fn test_synthesize_appends_deduped_sources() {
        let mock = Arc::new(MockLlmProvider::with_response("Grounded answer."));
        let synthesizer = Synthesizer::new(mock, SynthesisConfig::default());
        let draft = synthesizer
            .synthesize("What are design controls?", &evidence())
            .await
            .unwrap();

        assert!(draft.text.starts_with("Grounded answer."));
        assert!(draft.text.contains("## Sources Referenced"));
        assert!(draft.text.contains("- FDA_Guidance.pdf (Page: 4)"));
        assert!(draft.text.contains("- FDA_Guidance.pdf (Page: 9)"));
        assert!(draft.text.contains("- WHO_GMP.pdf (Page: 2)"));
        // First-seen order: FDA page 4 before WHO.
        let fda_pos = draft.text.find("- FDA_Guidance.pdf (Page: 4)").unwrap();
        let who_pos = draft.text.find("- WHO_GMP.pdf (Page: 2)").unwrap();
        assert!(fda_pos < who_pos);
    }

    #[tokio::test]
    async fn test_synthesize_duplicate_source_pages_listed_once() {
        let chunks = vec![
            StaticIndex::chunk("first passage", "FDA_Guidance.pdf", 4, 0.9),
            StaticIndex::chunk("second passage", "FDA_Guidance.pdf", 4, 0.8),
        ];
        let mock = Arc::new(MockLlmProvider::with_response("answer"));
        let synthesizer = Synthesizer::new(mock, SynthesisConfig::default());
        let draft = synthesizer.synthesize("q", &chunks).await.unwrap();

        let occurrences = draft
            .text
            .matches("- FDA_Guidance.pdf (Page: 4)")
            .count();
        assert_eq!(occurrences, 1);
    }

    #[tokio::test]
    async fn test_synthesize_empty_evidence_omits_source_list() {
        let mock = Arc::new(MockLlmProvider::with_response(
            "I don't have regulatory documents for that.",
        ));
        let synthesizer = Synthesizer::new(mock, SynthesisConfig::default());
        let draft = synthesizer.synthesize("what's the weather?", &[]).await.unwrap();
        assert!(!draft.text.contains("## Sources Referenced"));
    }

    #[tokio::test]
    async fn test_synthesize_propagates_provider_failure() {
        let mock = Arc::new(MockLlmProvider::new()); // empty queue -> error
        let synthesizer = Synthesizer::new(mock, SynthesisConfig::default());
        let err = synthesizer.synthesize("q", &[]).await.unwrap_err();
        assert!(matches!(err, LlmError::ApiRequest { .. }));
    }
}
