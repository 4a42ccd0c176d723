//! Claim verification stage.
//!
//! Decomposes a draft answer into discrete factual claims and checks each
//! against the evidence set for lexical support. This is a cheap overlap
//! heuristic, not semantic entailment: it trades precision for running with
//! no extra model call. An optional LLM quality assessment runs best-effort
//! on top and can never change the decision.

use crate::config::VerificationConfig;
use crate::llm::LlmProvider;
use crate::types::{CompletionRequest, DraftAnswer, EvidenceChunk, Message};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Generic regulatory words excluded from key terms: they would trivially
/// match in any regulatory corpus.
const STOP_TERMS: [&str; 5] = ["medical", "device", "regulation", "requirement", "guidance"];

/// Minimum words for a sentence to count as a claim.
const MIN_CLAIM_WORDS: usize = 4;

/// At most this many key terms are kept per claim.
const MAX_KEY_TERMS: usize = 7;

/// Fraction of a claim's key terms that must appear in the evidence.
const SUPPORT_FRACTION: f32 = 0.3;

/// Verification decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Revise,
}

/// Best-effort LLM quality scorecard for a verified answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityAssessment {
    #[serde(default)]
    pub overall_quality: Option<u8>,
    #[serde(default)]
    pub regulatory_compliance: Option<u8>,
    #[serde(default)]
    pub citation_quality: Option<u8>,
    #[serde(default)]
    pub formatting_score: Option<u8>,
    #[serde(default)]
    pub missing_aspects: Vec<String>,
    #[serde(default)]
    pub potential_hallucinations: Vec<String>,
}

/// Result of verifying a draft answer against its evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub decision: Decision,
    /// Fraction of claims supported, 1.0 when there was nothing to check.
    pub coverage: f32,
    pub total_claims: usize,
    pub supported_claims: usize,
    pub unsupported_claims: Vec<String>,
    /// Quality assessment, when the side call succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment: Option<QualityAssessment>,
    /// Why the assessment is missing, when it failed. Never affects `decision`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment_error: Option<String>,
}

/// Claim verifier with a configurable approval policy.
pub struct ClaimVerifier {
    provider: Option<Arc<dyn LlmProvider>>,
    config: VerificationConfig,
    citation_only: Regex,
    word: Regex,
    json_object: Regex,
}

impl ClaimVerifier {
    pub fn new(config: VerificationConfig) -> Self {
        Self {
            provider: None,
            config,
            citation_only: Regex::new(r"^\[.*\]$").unwrap(),
            word: Regex::new(r"\w+").unwrap(),
            json_object: Regex::new(r"(?s)\{.*\}").unwrap(),
        }
    }

    /// Attach an LLM provider for the quality assessment side call.
    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Split text into sentence segments on terminal punctuation followed by
    /// whitespace. The punctuation stays with its sentence; a trailing
    /// fragment without terminal punctuation is kept as a segment.
    fn split_sentences(text: &str) -> Vec<String> {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            current.push(c);
            if matches!(c, '.' | '!' | '?')
                && chars.peek().is_none_or(|next| next.is_whitespace())
            {
                let segment = current.trim();
                if !segment.is_empty() {
                    segments.push(segment.to_string());
                }
                current.clear();
            }
        }
        let tail = current.trim();
        if !tail.is_empty() {
            segments.push(tail.to_string());
        }
        segments
    }

    /// Extract the declarative claims from an answer.
    ///
    /// Drops headings, source labels, list bullets, questions, citation-only
    /// lines, and anything under four words: structural text carries no
    /// checkable regulatory content.
    pub fn extract_claims(&self, answer: &str) -> Vec<String> {
        Self::split_sentences(answer)
            .into_iter()
            .filter(|sentence| {
                sentence.split_whitespace().count() >= MIN_CLAIM_WORDS
                    && !sentence.starts_with('#')
                    && !sentence.starts_with("Sources:")
                    && !sentence.starts_with('-')
                    && !sentence.ends_with('?')
                    && !self.citation_only.is_match(sentence)
            })
            .collect()
    }

    /// The key terms of a claim: lowercase word tokens longer than three
    /// characters, minus the generic stop-set, first `MAX_KEY_TERMS` kept.
    fn key_terms(&self, claim: &str) -> Vec<String> {
        let lower = claim.to_lowercase();
        self.word
            .find_iter(&lower)
            .map(|m| m.as_str().to_string())
            .filter(|t| t.len() > 3 && !STOP_TERMS.contains(&t.as_str()))
            .take(MAX_KEY_TERMS)
            .collect()
    }

    /// Partition claims into (supported, unsupported) against the evidence.
    ///
    /// A claim is supported when at least 30% of its key terms (minimum one)
    /// appear as substrings of the lowercased evidence text.
    pub fn check_support(
        &self,
        claims: &[String],
        evidence: &[EvidenceChunk],
    ) -> (Vec<String>, Vec<String>) {
        let doc_texts: Vec<String> = evidence.iter().map(|c| c.content.to_lowercase()).collect();

        let mut supported = Vec::new();
        let mut unsupported = Vec::new();
        for claim in claims {
            let terms = self.key_terms(claim);
            if terms.is_empty() {
                unsupported.push(claim.clone());
                continue;
            }

            let hits = terms
                .iter()
                .filter(|term| doc_texts.iter().any(|doc| doc.contains(term.as_str())))
                .count();
            let needed = ((terms.len() as f32) * SUPPORT_FRACTION).ceil().max(1.0) as usize;

            if hits >= needed {
                supported.push(claim.clone());
            } else {
                debug!(claim = %claim, hits = hits, needed = needed, "Claim unsupported");
                unsupported.push(claim.clone());
            }
        }
        (supported, unsupported)
    }

    fn make_decision(&self, coverage: f32, unsupported: usize) -> Decision {
        if coverage >= self.config.min_coverage && unsupported <= self.config.max_unsupported {
            Decision::Approve
        } else {
            Decision::Revise
        }
    }

    /// Verify a draft answer against its evidence.
    ///
    /// Pure function of its inputs apart from the optional assessment side
    /// call: identical answer and evidence always produce identical claims,
    /// coverage, and decision.
    pub async fn verify(
        &self,
        question: &str,
        answer: &DraftAnswer,
        evidence: &[EvidenceChunk],
    ) -> VerificationResult {
        if evidence.is_empty() {
            // Nothing to contradict the answer against. By default that is a
            // vacuous approve; strict mode refuses to trust an unevidenced
            // answer and forces revision.
            let result = if self.config.strict_empty_evidence {
                let claims = self.extract_claims(&answer.text);
                VerificationResult {
                    decision: Decision::Revise,
                    coverage: if claims.is_empty() { 1.0 } else { 0.0 },
                    total_claims: claims.len(),
                    supported_claims: 0,
                    unsupported_claims: claims,
                    assessment: None,
                    assessment_error: None,
                }
            } else {
                VerificationResult {
                    decision: Decision::Approve,
                    coverage: 1.0,
                    total_claims: 0,
                    supported_claims: 0,
                    unsupported_claims: Vec::new(),
                    assessment: None,
                    assessment_error: None,
                }
            };
            info!(
                decision = ?result.decision,
                strict = self.config.strict_empty_evidence,
                "Verification with empty evidence"
            );
            return result;
        }

        let claims = self.extract_claims(&answer.text);
        let (supported, unsupported) = self.check_support(&claims, evidence);
        let coverage = if claims.is_empty() {
            1.0
        } else {
            supported.len() as f32 / claims.len() as f32
        };
        let decision = self.make_decision(coverage, unsupported.len());

        info!(
            decision = ?decision,
            coverage = coverage,
            total_claims = claims.len(),
            unsupported = unsupported.len(),
            "Verification complete"
        );

        let (assessment, assessment_error) = if self.config.enable_assessment {
            match self
                .run_assessment(question, &answer.text, claims.len(), supported.len(), evidence)
                .await
            {
                Ok(a) => (Some(a), None),
                Err(e) => {
                    warn!(error = %e, "LLM quality assessment failed");
                    (None, Some(e))
                }
            }
        } else {
            (None, None)
        };

        VerificationResult {
            decision,
            coverage,
            total_claims: claims.len(),
            supported_claims: supported.len(),
            unsupported_claims: unsupported,
            assessment,
            assessment_error,
        }
    }

    /// Best-effort LLM scorecard. Failures are returned as strings and never
    /// reach the decision path.
    async fn run_assessment(
        &self,
        question: &str,
        answer: &str,
        total_claims: usize,
        supported_claims: usize,
        evidence: &[EvidenceChunk],
    ) -> Result<QualityAssessment, String> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| "no assessment provider configured".to_string())?;

        let sources: Vec<&str> = evidence.iter().take(3).map(|c| c.source.as_str()).collect();
        let prompt = format!(
            "Evaluate this regulatory answer for quality and accuracy. Return JSON only.\n\n\
             Question: {}\nAnswer: {}\nSupported claims: {}/{}\nAvailable sources: {:?}\n\n\
             Return JSON with:\n\
             - overall_quality: 1-5 scale\n\
             - regulatory_compliance: 1-5 scale for regulatory formatting\n\
             - citation_quality: 1-5 scale for proper citations\n\
             - missing_aspects: list of missing important regulatory aspects\n\
             - potential_hallucinations: list of potentially unsupported statements\n\
             - formatting_score: 1-5 for clarity and regulatory structure",
            question, answer, supported_claims, total_claims, sources
        );

        let request = CompletionRequest {
            messages: vec![
                Message::system(
                    "You are a regulatory quality assessor. Return only valid JSON.",
                ),
                Message::user(prompt),
            ],
            temperature: 0.1,
            max_tokens: Some(500),
            model: self.config.assessment_model.clone(),
            ..Default::default()
        };

        let response = provider.complete(request).await.map_err(|e| e.to_string())?;
        let raw = response.content.trim();

        match serde_json::from_str::<QualityAssessment>(raw) {
            Ok(assessment) => Ok(assessment),
            Err(_) => {
                // The model sometimes wraps the JSON in prose or fences; try
                // the outermost object before giving up.
                let embedded = self.json_object.find(raw).map(|m| m.as_str());
                match embedded {
                    Some(json) => serde_json::from_str::<QualityAssessment>(json)
                        .map_err(|e| format!("assessment JSON invalid: {}", e)),
                    None => Err(format!("assessment response had no JSON object: {}", raw)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::StaticIndex;
    use crate::llm::MockLlmProvider;
    use pretty_assertions::assert_eq;

    fn verifier() -> ClaimVerifier {
        ClaimVerifier::new(VerificationConfig {
            enable_assessment: false,
            ..Default::default()
        })
    }

    fn draft(text: &str) -> DraftAnswer {
        DraftAnswer {
            text: text.to_string(),
            model: "mock-model".to_string(),
        }
    }

    fn fda_evidence() -> Vec<EvidenceChunk> {
        vec![
            StaticIndex::chunk(
                "The FDA requires software validation under design controls. Verification and validation activities must be planned and documented.",
                "FDA_Guidance.pdf",
                4,
                0.9,
            ),
            StaticIndex::chunk(
                "Design control procedures apply to class II and class III devices.",
                "FDA_Guidance.pdf",
                9,
                0.8,
            ),
        ]
    }

    #[test]
    fn test_extract_claims_filters_structural_text() {
        let v = verifier();
        let answer = "## Executive Summary\n\nShort line here. The FDA requires software validation for automated processes. Sources: listed below. - bullet item with several words here. Is this a question with many words? [FDA_Guidance.pdf, Page 4] This final sentence asserts a documented regulatory obligation clearly.";
        let claims = v.extract_claims(answer);

        // Heading segment, short line, Sources label, bullet, question, and
        // citation-only line are all dropped.
        assert_eq!(claims.len(), 2);
        assert!(claims[0].contains("FDA requires software validation"));
        assert!(claims[1].contains("final sentence asserts"));
    }

    #[test]
    fn test_extract_claims_excludes_questions_and_short_lines() {
        let v = verifier();
        let answer = "What about this long interrogative sentence here? Too short. Yes.";
        assert!(v.extract_claims(answer).is_empty());
    }

    #[test]
    fn test_extract_claims_heading_segment_dropped_entirely() {
        let v = verifier();
        // No terminal punctuation after the heading: the heading and the
        // following sentence form one segment, which the `#` filter drops.
        let answer = "## Detailed Analysis\nThe agency expects thorough validation planning.";
        assert!(v.extract_claims(answer).is_empty());
    }

    #[test]
    fn test_split_sentences_keeps_trailing_fragment() {
        let segments =
            ClaimVerifier::split_sentences("First sentence ends here. A trailing fragment");
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1], "A trailing fragment");
    }

    #[test]
    fn test_key_terms_skip_stop_set_and_short_tokens() {
        let v = verifier();
        let terms =
            v.key_terms("The medical device regulation imposes validation requirements on software");
        // "medical", "device", "regulation" are stop terms; "the", "on" too short.
        assert_eq!(
            terms,
            vec!["imposes", "validation", "requirements", "software"]
        );
    }

    #[test]
    fn test_key_terms_capped_at_seven() {
        let v = verifier();
        let terms = v.key_terms(
            "Alpha bravo charlie delta echo foxtrot golf hotel india juliett kilo lima",
        );
        assert_eq!(terms.len(), 7);
        assert_eq!(terms[0], "alpha");
        assert_eq!(terms[6], "golf");
    }

    #[test]
    fn test_check_support_partitions_claims() {
        let v = verifier();
        let claims = vec![
            "Software validation must be planned under design controls.".to_string(),
            "Quantum entanglement accelerates bureaucratic filings dramatically overnight.".to_string(),
        ];
        let (supported, unsupported) = v.check_support(&claims, &fda_evidence());
        assert_eq!(supported.len(), 1);
        assert_eq!(unsupported.len(), 1);
        assert!(supported[0].contains("Software validation"));
        assert!(unsupported[0].contains("Quantum"));
    }

    #[test]
    fn test_check_support_claim_without_terms_is_unsupported() {
        let v = verifier();
        let claims = vec!["A an of to it be so no".to_string()];
        let (supported, unsupported) = v.check_support(&claims, &fda_evidence());
        assert!(supported.is_empty());
        assert_eq!(unsupported.len(), 1);
    }

    #[tokio::test]
    async fn test_verify_empty_evidence_is_vacuous_approve() {
        let v = verifier();
        let result = v
            .verify("q", &draft("Completely unverifiable statement about anything."), &[])
            .await;
        assert_eq!(result.decision, Decision::Approve);
        assert_eq!(result.coverage, 1.0);
        assert_eq!(result.total_claims, 0);
        assert!(result.unsupported_claims.is_empty());
    }

    #[tokio::test]
    async fn test_verify_empty_evidence_strict_mode_revises() {
        let v = ClaimVerifier::new(VerificationConfig {
            strict_empty_evidence: true,
            enable_assessment: false,
            ..Default::default()
        });
        let result = v
            .verify("q", &draft("Completely unverifiable statement about anything."), &[])
            .await;
        assert_eq!(result.decision, Decision::Revise);
        assert_eq!(result.coverage, 0.0);
        assert_eq!(result.total_claims, 1);
        assert_eq!(result.unsupported_claims.len(), 1);
    }

    #[tokio::test]
    async fn test_verify_supported_answer_approves() {
        let v = verifier();
        let answer = "The FDA requires software validation under design controls. Validation activities must be planned and documented thoroughly.";
        let result = v.verify("q", &draft(answer), &fda_evidence()).await;
        assert_eq!(result.decision, Decision::Approve);
        assert!(result.coverage > 0.0);
        assert_eq!(result.total_claims, 2);
        assert_eq!(result.supported_claims, 2);
    }

    #[tokio::test]
    async fn test_verify_unsupported_answer_revises() {
        let v = verifier();
        let answer = "Quantum entanglement accelerates bureaucratic filings dramatically overnight. Telepathic submissions are mandatory for premarket notifications everywhere. Interstellar commissions audit lunar manufacturing sites quarterly.";
        let result = v.verify("q", &draft(answer), &fda_evidence()).await;
        assert_eq!(result.decision, Decision::Revise);
        assert_eq!(result.supported_claims, 0);
        assert_eq!(result.unsupported_claims.len(), 3);
    }

    #[tokio::test]
    async fn test_verify_decision_boundary() {
        // max_unsupported = 0: one unsupported claim must flip the decision
        // even when coverage clears the bar.
        let v = ClaimVerifier::new(VerificationConfig {
            min_coverage: 0.5,
            max_unsupported: 0,
            enable_assessment: false,
            ..Default::default()
        });
        let answer = "The FDA requires software validation under design controls. Validation must be planned and documented carefully. Telepathic submissions are mandatory for premarket notifications everywhere.";
        let result = v.verify("q", &draft(answer), &fda_evidence()).await;
        assert!(result.coverage >= 0.5);
        assert_eq!(result.unsupported_claims.len(), 1);
        assert_eq!(result.decision, Decision::Revise);
    }

    #[tokio::test]
    async fn test_verify_is_deterministic_for_fixed_input() {
        let v = verifier();
        let answer = "The FDA requires software validation under design controls. Quantum entanglement accelerates bureaucratic filings dramatically overnight.";
        let first = v.verify("q", &draft(answer), &fda_evidence()).await;
        let second = v.verify("q", &draft(answer), &fda_evidence()).await;
        assert_eq!(first.decision, second.decision);
        assert_eq!(first.coverage, second.coverage);
        assert_eq!(first.unsupported_claims, second.unsupported_claims);
    }

    #[tokio::test]
    async fn test_assessment_success_is_attached() {
        let mock = Arc::new(MockLlmProvider::with_response(
            r#"{"overall_quality": 4, "regulatory_compliance": 5, "citation_quality": 4, "formatting_score": 5, "missing_aspects": [], "potential_hallucinations": []}"#,
        ));
        let v = ClaimVerifier::new(VerificationConfig::default()).with_provider(mock);
        let answer = "The FDA requires software validation under design controls.";
        let result = v.verify("q", &draft(answer), &fda_evidence()).await;
        let assessment = result.assessment.expect("assessment should be attached");
        assert_eq!(assessment.overall_quality, Some(4));
        assert!(result.assessment_error.is_none());
    }

    #[tokio::test]
    async fn test_assessment_extracts_embedded_json() {
        let mock = Arc::new(MockLlmProvider::with_response(
            "Here is my evaluation:\n{\"overall_quality\": 3, \"missing_aspects\": [\"risk analysis\"]}\nDone.",
        ));
        let v = ClaimVerifier::new(VerificationConfig::default()).with_provider(mock);
        let answer = "The FDA requires software validation under design controls.";
        let result = v.verify("q", &draft(answer), &fda_evidence()).await;
        let assessment = result.assessment.expect("embedded JSON should parse");
        assert_eq!(assessment.overall_quality, Some(3));
        assert_eq!(assessment.missing_aspects, vec!["risk analysis"]);
    }

    #[tokio::test]
    async fn test_assessment_failure_never_changes_decision() {
        let mock = Arc::new(MockLlmProvider::with_response("not json at all"));
        let v = ClaimVerifier::new(VerificationConfig::default()).with_provider(mock);
        let answer = "The FDA requires software validation under design controls.";
        let result = v.verify("q", &draft(answer), &fda_evidence()).await;
        assert_eq!(result.decision, Decision::Approve);
        assert!(result.assessment.is_none());
        assert!(result.assessment_error.is_some());
    }

    #[tokio::test]
    async fn test_assessment_skipped_without_provider() {
        let v = ClaimVerifier::new(VerificationConfig::default());
        let answer = "The FDA requires software validation under design controls.";
        let result = v.verify("q", &draft(answer), &fda_evidence()).await;
        assert!(result.assessment.is_none());
        assert!(result.assessment_error.is_some());
    }
}
