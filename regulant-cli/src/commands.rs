//! Command implementations for the Regulant CLI.

use anyhow::Context;
use regulant_core::pipeline::{Pipeline, PipelineOutcome};
use regulant_core::RegulantConfig;
use serde_json::json;
use tracing::info;

/// Run a question through the pipeline and print the outcome.
pub async fn ask(
    config: RegulantConfig,
    question: &str,
    show_evidence: bool,
    json_output: bool,
) -> anyhow::Result<()> {
    let pipeline = Pipeline::from_config(config).context("failed to assemble pipeline")?;

    let outcome = match pipeline.run(question).await {
        Ok(outcome) => outcome,
        Err(failure) => {
            // Surface whatever the pipeline had computed before it failed.
            if let Some(evidence) = &failure.partial.evidence {
                eprintln!("Evidence retrieved before failure: {} chunks", evidence.len());
            }
            if let Some(draft) = &failure.partial.draft {
                eprintln!("Draft synthesized before failure ({} chars)", draft.text.len());
            }
            return Err(anyhow::Error::new(failure));
        }
    };

    if json_output {
        println!("{}", serde_json::to_string_pretty(&outcome_json(&outcome))?);
        return Ok(());
    }

    println!("{}", outcome.response.final_answer);
    println!();
    println!(
        "[guard: {:?} — {}]",
        outcome.response.decision.status, outcome.response.decision.reason
    );

    if let Some(verification) = &outcome.verification {
        println!(
            "[verification: {:?}, coverage {:.2}, {}/{} claims supported]",
            verification.decision,
            verification.coverage,
            verification.supported_claims,
            verification.total_claims
        );
        for claim in &verification.unsupported_claims {
            println!("  unsupported: {}", claim);
        }
    }

    if show_evidence {
        println!();
        for chunk in &outcome.evidence {
            println!(
                "--- [{}] {} (score: {})",
                chunk.rank,
                chunk.source_ref(),
                chunk
                    .relevance_score
                    .map(|s| format!("{:.3}", s))
                    .unwrap_or_else(|| "n/a".to_string())
            );
            println!("{}", chunk.content);
        }
    }

    info!(
        used_retrieval = outcome.used_retrieval,
        retrieval_ms = ?outcome.timings.retrieval_ms,
        synthesis_ms = ?outcome.timings.synthesis_ms,
        verification_ms = ?outcome.timings.verification_ms,
        guard_ms = ?outcome.timings.guard_ms,
        "Pipeline timings"
    );

    Ok(())
}

/// The full outcome as a JSON document for scripting.
fn outcome_json(outcome: &PipelineOutcome) -> serde_json::Value {
    json!({
        "response": outcome.response,
        "evidence": outcome.evidence,
        "draft": outcome.draft,
        "verification": outcome.verification,
        "used_retrieval": outcome.used_retrieval,
        "timings": {
            "retrieval_ms": outcome.timings.retrieval_ms,
            "synthesis_ms": outcome.timings.synthesis_ms,
            "verification_ms": outcome.timings.verification_ms,
            "guard_ms": outcome.timings.guard_ms,
        },
    })
}

/// Print the resolved configuration as pretty JSON.
pub fn show_config(config: &RegulantConfig) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
