//! Runtime configuration loaded from environment variables.

use std::env;
use std::str::FromStr;

/// Application-level constants
pub const APP_NAME: &str = "Clinscribe";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "clinscribe=info"
}

/// Runtime knobs for the pipeline and its collaborators.
///
/// Defaults suit a single-machine deployment with local model servers;
/// `from_env` overrides any field from the process environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base URL of the FHIR server, including the `/fhir` path.
    pub fhir_server_url: String,
    /// Per-request FHIR timeout in seconds.
    pub fhir_timeout_s: u64,
    /// Wall-clock budget for one full pipeline run in seconds.
    pub pipeline_timeout_s: u64,
    /// Output token cap for letter generation.
    pub doc_gen_max_tokens: u32,
    /// Token budget for the structured context fed into generation.
    pub context_budget_tokens: usize,
    /// Base URL of the speech-to-text sidecar.
    pub asr_server_url: String,
    /// Per-request transcription timeout in seconds.
    pub asr_timeout_s: u64,
    /// Base URL of the Ollama-compatible generation server.
    pub llm_server_url: String,
    /// Generation model name on that server.
    pub llm_model: String,
    /// Per-request generation timeout in seconds.
    pub llm_timeout_s: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fhir_server_url: "http://localhost:8080/fhir".to_string(),
            fhir_timeout_s: 10,
            pipeline_timeout_s: 120,
            doc_gen_max_tokens: 2048,
            context_budget_tokens: 3000,
            asr_server_url: "http://localhost:8090".to_string(),
            asr_timeout_s: 120,
            llm_server_url: "http://localhost:11434".to_string(),
            llm_model: "medgemma:27b".to_string(),
            llm_timeout_s: 300,
        }
    }
}

impl Settings {
    /// Read settings from the environment, falling back to defaults for
    /// unset or unparseable values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            fhir_server_url: env_string("FHIR_SERVER_URL", defaults.fhir_server_url),
            fhir_timeout_s: env_parse("FHIR_TIMEOUT_S", defaults.fhir_timeout_s),
            pipeline_timeout_s: env_parse("PIPELINE_TIMEOUT_S", defaults.pipeline_timeout_s),
            doc_gen_max_tokens: env_parse("DOC_GEN_MAX_TOKENS", defaults.doc_gen_max_tokens),
            context_budget_tokens: env_parse("CONTEXT_BUDGET_TOKENS", defaults.context_budget_tokens),
            asr_server_url: env_string("ASR_SERVER_URL", defaults.asr_server_url),
            asr_timeout_s: env_parse("ASR_TIMEOUT_S", defaults.asr_timeout_s),
            llm_server_url: env_string("LLM_SERVER_URL", defaults.llm_server_url),
            llm_model: env_string("LLM_MODEL", defaults.llm_model),
            llm_timeout_s: env_parse("LLM_TIMEOUT_S", defaults.llm_timeout_s),
        }
    }
}

fn env_string(name: &str, default: String) -> String {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => default,
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}
