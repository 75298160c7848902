//! Clinscribe: consultation-to-letter pipeline.
//!
//! Records a clinical consultation, transcribes the audio, retrieves the
//! patient's record from a FHIR server, and generates a structured clinic
//! letter for clinician review and sign-off. The whole flow is driven by
//! [`PipelineOrchestrator`].

pub mod config;
pub mod fhir;
pub mod models;
pub mod pipeline;

pub use config::Settings;
pub use models::{
    ClinicalDocument, Consultation, ConsultationStatus, DocumentSection, Patient, PatientContext,
    PipelineProgress, PipelineStage, Transcript,
};
pub use pipeline::{HealthStatus, PipelineError, PipelineOrchestrator};

use tracing_subscriber::EnvFilter;

/// Initialize tracing for a host process.
///
/// Honors `RUST_LOG` when set, otherwise falls back to the crate default.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);
}
