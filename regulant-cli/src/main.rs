//! Regulant CLI — Terminal interface for the Regulant pipeline.
//!
//! Asks regulatory questions against the configured evidence index and
//! prints the gated answer with its verification metrics.

mod commands;

use clap::Parser;
use regulant_core::RegulantConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Regulant: evidence-grounded regulatory answers for medical devices
#[derive(Parser, Debug)]
#[command(name = "regulant", version, about, long_about = None)]
struct Cli {
    /// Configuration file path (defaults to regulant.toml / user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Ask a question through the full pipeline
    Ask {
        /// The question to answer
        question: String,

        /// Number of evidence chunks to retrieve
        #[arg(long)]
        top_k: Option<usize>,

        /// Enable cross-encoder reranking
        #[arg(long)]
        rerank: bool,

        /// Minimum claim coverage required to approve
        #[arg(long)]
        min_coverage: Option<f32>,

        /// Maximum unsupported claims tolerated
        #[arg(long)]
        max_unsupported: Option<usize>,

        /// Disable sanitize replacement (decision is still recorded)
        #[arg(long)]
        no_sanitize: bool,

        /// Print the retrieved evidence chunks
        #[arg(long)]
        show_evidence: bool,

        /// Emit the full outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the resolved configuration
    Config,
}

fn init_tracing(verbose: u8, quiet: bool) {
    let default_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let config = match &cli.config {
        Some(path) => RegulantConfig::load_from(path)?,
        None => RegulantConfig::load()?,
    };

    match cli.command {
        Commands::Ask {
            question,
            top_k,
            rerank,
            min_coverage,
            max_unsupported,
            no_sanitize,
            show_evidence,
            json,
        } => {
            let mut config = config;
            if let Some(top_k) = top_k {
                config.retrieval.top_k = top_k;
            }
            if rerank {
                config.retrieval.enable_rerank = true;
            }
            if let Some(min_coverage) = min_coverage {
                config.verification.min_coverage = min_coverage;
            }
            if let Some(max_unsupported) = max_unsupported {
                config.verification.max_unsupported = max_unsupported;
            }
            if no_sanitize {
                config.guard.sanitize_enabled = false;
            }
            commands::ask(config, &question, show_evidence, json).await
        }
        Commands::Config => commands::show_config(&config),
    }
}
