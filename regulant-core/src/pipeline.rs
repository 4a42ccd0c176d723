//! Pipeline orchestrator.
//!
//! The only component with branching logic: decides whether a question needs
//! evidence retrieval at all, sequences retrieval -> synthesis ->
//! verification -> guard, and contains failures. Data flows strictly
//! forward; every stage owns its output and nothing is mutated after being
//! handed to the next stage.

use crate::config::RegulantConfig;
use crate::error::{GuardError, RegulantError};
use crate::guard::{
    BLOCK_MESSAGE, GuardDecision, GuardStatus, GuardedResponse, SafetyGuard,
};
use crate::index::HttpVectorIndex;
use crate::llm::LlmProvider;
use crate::providers::create_provider;
use crate::rerank::HttpCrossEncoder;
use crate::retriever::Retriever;
use crate::synthesizer::Synthesizer;
use crate::types::{DraftAnswer, EvidenceSet};
use crate::verifier::{ClaimVerifier, VerificationResult};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Vocabulary that marks a question as regulatory.
pub const REGULATORY_KEYWORDS: [&str; 10] = [
    "fda",
    "who",
    "regulation",
    "medical device",
    "software",
    "validation",
    "design control",
    "requirement",
    "guidance",
    "standard",
];

/// Whether a question should go through evidence retrieval.
pub fn is_regulatory(question: &str) -> bool {
    let lower = question.to_lowercase();
    REGULATORY_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// The pipeline stage an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Retrieval,
    Synthesis,
    Verification,
    Guard,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStage::Retrieval => write!(f, "retrieval"),
            PipelineStage::Synthesis => write!(f, "synthesis"),
            PipelineStage::Verification => write!(f, "verification"),
            PipelineStage::Guard => write!(f, "guard"),
        }
    }
}

/// Artifacts already computed when a stage failed. Attached to the failure
/// for diagnostics, never silently discarded.
#[derive(Debug, Default)]
pub struct PartialRun {
    pub evidence: Option<EvidenceSet>,
    pub draft: Option<DraftAnswer>,
    pub verification: Option<VerificationResult>,
}

/// A pipeline run that aborted at some stage.
#[derive(Debug, thiserror::Error)]
#[error("pipeline failed during {stage}: {error}")]
pub struct PipelineFailure {
    pub stage: PipelineStage,
    #[source]
    pub error: RegulantError,
    pub partial: PartialRun,
}

/// Per-stage wall-clock durations in milliseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageTimings {
    pub retrieval_ms: Option<u64>,
    pub synthesis_ms: Option<u64>,
    pub verification_ms: Option<u64>,
    pub guard_ms: Option<u64>,
}

/// Everything a pipeline run produced, intermediates included.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub response: GuardedResponse,
    pub evidence: EvidenceSet,
    pub draft: DraftAnswer,
    /// Absent on the non-regulatory path, where there is nothing to verify.
    pub verification: Option<VerificationResult>,
    pub used_retrieval: bool,
    pub timings: StageTimings,
}

/// The assembled question-answering pipeline.
pub struct Pipeline {
    config: RegulantConfig,
    retriever: Retriever,
    synthesizer: Synthesizer,
    verifier: ClaimVerifier,
    guard: SafetyGuard,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Assemble a pipeline from pre-built components. Used directly by tests;
    /// production code goes through [`Pipeline::from_config`].
    pub fn new(
        config: RegulantConfig,
        retriever: Retriever,
        synthesizer: Synthesizer,
        verifier: ClaimVerifier,
        guard: SafetyGuard,
    ) -> Self {
        Self {
            config,
            retriever,
            synthesizer,
            verifier,
            guard,
        }
    }

    /// Build the pipeline from configuration: one provider per role, shared
    /// read-only clients, every external call bounded by its configured
    /// timeout.
    pub fn from_config(config: RegulantConfig) -> Result<Self, RegulantError> {
        config.validate()?;

        let synth_provider: Arc<dyn LlmProvider> = create_provider(&config.llm)?;
        let guard_provider: Arc<dyn LlmProvider> = create_provider(&config.guard_llm())?;

        let index = Arc::new(HttpVectorIndex::new(
            config.retrieval.index_url.clone(),
            config.retrieval.collection.clone(),
            config.retrieval.timeout_secs,
        )?);
        let mut retriever = Retriever::new(index, config.retrieval.clone());
        if config.retrieval.enable_rerank {
            let rerank_url = config.retrieval.rerank_url.clone().ok_or_else(|| {
                crate::error::ConfigError::Invalid {
                    message: "retrieval.rerank_url is required when enable_rerank is set"
                        .to_string(),
                }
            })?;
            let encoder = Arc::new(HttpCrossEncoder::new(
                rerank_url,
                config.retrieval.timeout_secs,
            )?);
            retriever = retriever.with_cross_encoder(encoder);
        }

        let synthesizer = Synthesizer::new(synth_provider.clone(), config.synthesis.clone());
        let verifier =
            ClaimVerifier::new(config.verification.clone()).with_provider(synth_provider);
        let guard = SafetyGuard::new(guard_provider, config.guard.clone());

        Ok(Self {
            config,
            retriever,
            synthesizer,
            verifier,
            guard,
        })
    }

    /// Answer a question through the full gated pipeline.
    ///
    /// Regulatory questions run retrieve -> synthesize -> verify -> guard;
    /// everything else is synthesized directly from an empty evidence set.
    /// The caller always gets either a complete `GuardedResponse` or a typed
    /// failure carrying the partial artifacts.
    pub async fn run(&self, question: &str) -> Result<PipelineOutcome, PipelineFailure> {
        let regulatory = is_regulatory(question);
        info!(regulatory = regulatory, "Pipeline run started");

        if !regulatory {
            return self.run_non_regulatory(question).await;
        }

        let mut timings = StageTimings::default();

        let started = Instant::now();
        let evidence = self
            .retriever
            .retrieve(question, self.config.retrieval.top_k)
            .await
            .map_err(|e| PipelineFailure {
                stage: PipelineStage::Retrieval,
                error: e.into(),
                partial: PartialRun::default(),
            })?;
        timings.retrieval_ms = Some(started.elapsed().as_millis() as u64);

        let started = Instant::now();
        let draft = self
            .synthesizer
            .synthesize(question, &evidence)
            .await
            .map_err(|e| PipelineFailure {
                stage: PipelineStage::Synthesis,
                error: e.into(),
                partial: PartialRun {
                    evidence: Some(evidence.clone()),
                    ..Default::default()
                },
            })?;
        timings.synthesis_ms = Some(started.elapsed().as_millis() as u64);

        let started = Instant::now();
        let verification = self.verifier.verify(question, &draft, &evidence).await;
        timings.verification_ms = Some(started.elapsed().as_millis() as u64);

        let started = Instant::now();
        let response = match self.guard.guard(question, &draft.text, &evidence).await {
            Ok(response) => response,
            Err(GuardError::ClassifierUnavailable { message }) => {
                // The guard could not run, so its verdict is unknown. Fail
                // closed: an unguarded answer must never reach the caller.
                warn!(error = %message, "Guard unavailable; blocking response");
                Self::fail_closed_response(&draft.text, &evidence, &message)
            }
        };
        timings.guard_ms = Some(started.elapsed().as_millis() as u64);

        info!(
            status = ?response.decision.status,
            chunks = evidence.len(),
            "Pipeline run complete"
        );

        Ok(PipelineOutcome {
            response,
            evidence,
            draft,
            verification: Some(verification),
            used_retrieval: true,
            timings,
        })
    }

    /// Non-regulatory path: no retrieval, and by default no guard.
    async fn run_non_regulatory(
        &self,
        question: &str,
    ) -> Result<PipelineOutcome, PipelineFailure> {
        let mut timings = StageTimings::default();

        let started = Instant::now();
        let draft = self
            .synthesizer
            .synthesize(question, &[])
            .await
            .map_err(|e| PipelineFailure {
                stage: PipelineStage::Synthesis,
                error: e.into(),
                partial: PartialRun::default(),
            })?;
        timings.synthesis_ms = Some(started.elapsed().as_millis() as u64);

        let response = if self.config.guard.guard_non_regulatory {
            let started = Instant::now();
            let response = match self.guard.guard(question, &draft.text, &[]).await {
                Ok(response) => response,
                Err(GuardError::ClassifierUnavailable { message }) => {
                    warn!(error = %message, "Guard unavailable; blocking response");
                    Self::fail_closed_response(&draft.text, &[], &message)
                }
            };
            timings.guard_ms = Some(started.elapsed().as_millis() as u64);
            response
        } else {
            GuardedResponse {
                decision: GuardDecision {
                    status: GuardStatus::Allow,
                    reason: "Non-regulatory question; guard skipped".to_string(),
                    safe_message: None,
                    classification: None,
                },
                final_answer: draft.text.clone(),
                original_answer: draft.text.clone(),
                context_used: None,
            }
        };

        Ok(PipelineOutcome {
            response,
            evidence: Vec::new(),
            draft,
            verification: None,
            used_retrieval: false,
            timings,
        })
    }

    /// The block-status response used when the guard could not run.
    fn fail_closed_response(
        draft_answer: &str,
        evidence: &[crate::types::EvidenceChunk],
        outage: &str,
    ) -> GuardedResponse {
        GuardedResponse {
            decision: GuardDecision {
                status: GuardStatus::Block,
                reason: format!("Safety classifier unavailable: {}", outage),
                safe_message: Some(BLOCK_MESSAGE.to_string()),
                classification: None,
            },
            final_answer: BLOCK_MESSAGE.to_string(),
            original_answer: draft_answer.to_string(),
            context_used: if evidence.is_empty() {
                None
            } else {
                Some(evidence.to_vec())
            },
        }
    }
}
