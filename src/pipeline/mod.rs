pub mod accelerator;
pub mod budget;
pub mod generate;
pub mod orchestrator;
pub mod retrieve;
pub mod runner;
pub mod sections;
pub mod store;
pub mod transcribe;

pub use accelerator::{AcceleratorCache, AcceleratorStatus, NoopAcceleratorCache};
pub use generate::{FixtureGenerator, LetterGenerator, OllamaGenerator};
pub use orchestrator::{HealthStatus, PipelineOrchestrator};
pub use retrieve::{ContextSource, FhirContextSource, FixtureContextSource};
pub use store::ConsultationStore;
pub use transcribe::{FixtureTranscriber, HttpTranscriber, Transcriber};

use thiserror::Error;

/// Failures surfaced to callers of the orchestrator.
///
/// Stage collaborators raise their own error types; the pipeline folds
/// them into these variants so the API layer only maps one enum.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Consultation not found: {0}")]
    ConsultationNotFound(String),

    #[error("Progress not found for consultation: {0}")]
    ProgressNotFound(String),

    #[error("{0}")]
    Audio(String),

    #[error("{0}")]
    ModelExecution(String),

    #[error("Pipeline timed out after {0} seconds")]
    Timeout(u64),

    #[error("Consultation store unavailable: {0}")]
    Store(String),
}

impl PipelineError {
    /// Stable discriminant for wire payloads and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::ConsultationNotFound(_) | PipelineError::ProgressNotFound(_) => {
                "not_found"
            }
            PipelineError::Audio(_) => "audio_error",
            PipelineError::ModelExecution(_) => "model_execution_error",
            PipelineError::Timeout(_) => "timeout",
            PipelineError::Store(_) => "store_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(
            PipelineError::ConsultationNotFound("cons-1".into()).kind(),
            "not_found"
        );
        assert_eq!(
            PipelineError::ProgressNotFound("cons-1".into()).kind(),
            "not_found"
        );
        assert_eq!(PipelineError::Audio("silent".into()).kind(), "audio_error");
        assert_eq!(
            PipelineError::ModelExecution("oom".into()).kind(),
            "model_execution_error"
        );
        assert_eq!(PipelineError::Timeout(120).kind(), "timeout");
        assert_eq!(PipelineError::Store("poisoned".into()).kind(), "store_error");
    }

    #[test]
    fn messages_match_the_wire_contract() {
        assert_eq!(
            PipelineError::ConsultationNotFound("cons-9".into()).to_string(),
            "Consultation not found: cons-9"
        );
        assert_eq!(
            PipelineError::Timeout(120).to_string(),
            "Pipeline timed out after 120 seconds"
        );
        assert_eq!(
            PipelineError::ProgressNotFound("cons-9".into()).to_string(),
            "Progress not found for consultation: cons-9"
        );
    }
}
