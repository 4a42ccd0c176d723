//! Configuration system for Regulant.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment.
//! Configuration is loaded from `~/.config/regulant/config.toml` and/or
//! `regulant.toml` in the working directory, with `REGULANT_*` environment
//! variables layered on top (nested fields separated by `__`, e.g.
//! `REGULANT_RETRIEVAL__TOP_K=8`).
//!
//! There is no global settings singleton: the config is built once at startup
//! and handed into each component's constructor.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for the Regulant pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegulantConfig {
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub synthesis: SynthesisConfig,
    pub verification: VerificationConfig,
    pub guard: GuardConfig,
}

/// Configuration for an LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "openai" (or any OpenAI-compatible endpoint), "anthropic", "gemini".
    pub provider: String,
    /// Model identifier sent to the provider.
    pub model: String,
    /// Explicit API key. Takes precedence over `api_key_env` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Environment variable to read the API key from.
    pub api_key_env: String,
    /// Override for the provider base URL (Azure, Ollama, vLLM, proxies).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Request timeout in seconds. Every provider call is bounded by this.
    pub timeout_secs: u64,
    /// Retry policy for transient provider errors.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            timeout_secs: 60,
            retry: RetryConfig::default(),
        }
    }
}

/// Retry policy for LLM calls.
///
/// Retries are off by default: a generation call may be separately billed and
/// is not guaranteed idempotent, so the operator has to opt in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Configuration for the evidence retrieval stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Base URL of the vector index query service.
    pub index_url: String,
    /// Collection to query within the index.
    pub collection: String,
    /// Number of chunks requested from the index.
    pub top_k: usize,
    /// Whether to rerank the initial retrieval with a cross-encoder.
    pub enable_rerank: bool,
    /// Base URL of the cross-encoder scoring service (required when reranking).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_url: Option<String>,
    /// Number of chunks kept after reranking.
    pub rerank_top_k: usize,
    /// Timeout in seconds for index and reranker calls.
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            index_url: "http://127.0.0.1:8000".to_string(),
            collection: "regulatory_documents".to_string(),
            top_k: 5,
            enable_rerank: false,
            rerank_url: None,
            rerank_top_k: 3,
            timeout_secs: 30,
        }
    }
}

/// Configuration for answer synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Sampling temperature. Kept low so repeated synthesis over the same
    /// evidence stays reproducible enough to verify.
    pub temperature: f32,
    /// Maximum tokens generated for the answer.
    pub max_tokens: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 1_500,
        }
    }
}

/// Configuration for claim verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Minimum supported-claim fraction required to approve.
    pub min_coverage: f32,
    /// Maximum number of unsupported claims tolerated.
    pub max_unsupported: usize,
    /// When true, an empty evidence set forces `revise` instead of the
    /// vacuous approve.
    pub strict_empty_evidence: bool,
    /// Whether to run the best-effort LLM quality assessment.
    pub enable_assessment: bool,
    /// Model for the quality assessment call. Falls back to `llm.model`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment_model: Option<String>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            min_coverage: 0.7,
            max_unsupported: 2,
            strict_empty_evidence: false,
            enable_assessment: true,
            assessment_model: None,
        }
    }
}

/// Configuration for the safety guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Model used for the safety classification call.
    pub model: String,
    /// Whether a sanitize decision actually replaces the answer text.
    pub sanitize_enabled: bool,
    /// Whether the guard also runs on the non-regulatory path.
    pub guard_non_regulatory: bool,
    /// Character budget for the evidence snippet sent to the classifier.
    pub max_context_chars: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            sanitize_enabled: true,
            guard_non_regulatory: false,
            max_context_chars: 10_000,
        }
    }
}

impl RegulantConfig {
    /// Load configuration from the standard locations.
    ///
    /// Layering, later wins: built-in defaults, the user config file
    /// (`~/.config/regulant/config.toml`), `regulant.toml` in the working
    /// directory, then `REGULANT_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(RegulantConfig::default()));

        if let Some(dirs) = directories::ProjectDirs::from("", "", "regulant") {
            figment = figment.merge(Toml::file(dirs.config_dir().join("config.toml")));
        }

        figment
            .merge(Toml::file("regulant.toml"))
            .merge(Env::prefixed("REGULANT_").split("__"))
            .extract()
            .map_err(|e| ConfigError::ParseError {
                message: e.to_string(),
            })
    }

    /// Load configuration from an explicit file path plus environment.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        Figment::from(Serialized::defaults(RegulantConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("REGULANT_").split("__"))
            .extract()
            .map_err(|e| ConfigError::ParseError {
                message: e.to_string(),
            })
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.verification.min_coverage) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "verification.min_coverage must be within [0, 1], got {}",
                    self.verification.min_coverage
                ),
            });
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid {
                message: "retrieval.top_k must be at least 1".to_string(),
            });
        }
        if self.retrieval.enable_rerank {
            if self.retrieval.rerank_top_k == 0 {
                return Err(ConfigError::Invalid {
                    message: "retrieval.rerank_top_k must be at least 1".to_string(),
                });
            }
            if self.retrieval.rerank_top_k > self.retrieval.top_k {
                return Err(ConfigError::Invalid {
                    message: format!(
                        "retrieval.rerank_top_k ({}) cannot exceed retrieval.top_k ({})",
                        self.retrieval.rerank_top_k, self.retrieval.top_k
                    ),
                });
            }
        }
        if !(0.0..=2.0).contains(&self.synthesis.temperature) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "synthesis.temperature must be within [0, 2], got {}",
                    self.synthesis.temperature
                ),
            });
        }
        Ok(())
    }

    /// The LLM config used for guard classification: the main provider
    /// settings with the guard model substituted in.
    pub fn guard_llm(&self) -> LlmConfig {
        LlmConfig {
            model: self.guard.model.clone(),
            ..self.llm.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RegulantConfig::default();
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.rerank_top_k, 3);
        assert!(!config.retrieval.enable_rerank);
        assert_eq!(config.verification.min_coverage, 0.7);
        assert_eq!(config.verification.max_unsupported, 2);
        assert!(!config.verification.strict_empty_evidence);
        assert!(config.guard.sanitize_enabled);
        assert!(!config.guard.guard_non_regulatory);
        assert_eq!(config.guard.max_context_chars, 10_000);
        assert_eq!(config.llm.retry.max_retries, 0);
    }

    #[test]
    fn test_validate_defaults_ok() {
        assert!(RegulantConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_coverage() {
        let mut config = RegulantConfig::default();
        config.verification.min_coverage = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_coverage"));
    }

    #[test]
    fn test_validate_rejects_rerank_wider_than_retrieval() {
        let mut config = RegulantConfig::default();
        config.retrieval.enable_rerank = true;
        config.retrieval.rerank_top_k = 10;
        config.retrieval.top_k = 5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rerank_top_k"));
    }

    #[test]
    fn test_validate_rejects_zero_top_k() {
        let mut config = RegulantConfig::default();
        config.retrieval.top_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[llm]
provider = "anthropic"
model = "claude-sonnet-4-5"
api_key_env = "ANTHROPIC_API_KEY"

[retrieval]
top_k = 8
enable_rerank = true
rerank_url = "http://127.0.0.1:9000"

[guard]
sanitize_enabled = false
"#
        )
        .unwrap();

        let config = RegulantConfig::load_from(file.path()).unwrap();
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.llm.model, "claude-sonnet-4-5");
        assert_eq!(config.retrieval.top_k, 8);
        assert!(config.retrieval.enable_rerank);
        assert!(!config.guard.sanitize_enabled);
        // Unset fields keep their defaults.
        assert_eq!(config.retrieval.rerank_top_k, 3);
        assert_eq!(config.verification.min_coverage, 0.7);
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = RegulantConfig::load_from(Path::new("/nonexistent/regulant.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_guard_llm_substitutes_model() {
        let mut config = RegulantConfig::default();
        config.llm.model = "gpt-4o".to_string();
        config.guard.model = "guard-model".to_string();
        let guard_llm = config.guard_llm();
        assert_eq!(guard_llm.model, "guard-model");
        assert_eq!(guard_llm.provider, config.llm.provider);
        assert_eq!(guard_llm.api_key_env, config.llm.api_key_env);
    }
}
