use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::Settings;
use crate::fhir::FhirClient;
use crate::models::{
    ClinicalDocument, Consultation, ConsultationStatus, DocumentSection, Patient,
    PipelineProgress, PipelineStage,
};

use super::accelerator::{
    AcceleratorCache, AcceleratorStatus, NoopAcceleratorCache, OllamaAcceleratorCache,
};
use super::budget::fit_to_budget;
use super::generate::{generate_letter, FixtureGenerator, LetterGenerator, OllamaGenerator};
use super::retrieve::{ContextSource, FhirContextSource, FixtureContextSource};
use super::runner::{no_audio_error, run_pipeline, PipelineDeps};
use super::store::ConsultationStore;
use super::transcribe::{FixtureTranscriber, HttpTranscriber, Transcriber};
use super::PipelineError;

/// Timeout for accelerator housekeeping calls; releases should be quick.
const ACCELERATOR_TIMEOUT_S: u64 = 30;

/// Service health snapshot for the API layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub active_consultations: usize,
    pub gpu: AcceleratorStatus,
    pub timestamp: DateTime<Utc>,
}

/// Coordinates the consultation lifecycle across all pipeline stages.
///
/// Owns the in-memory consultation store and the four collaborator
/// capabilities. Every operation is synchronous except
/// [`end_consultation`], which runs the pipeline body on a blocking
/// worker raced against the configured wall-clock timeout.
pub struct PipelineOrchestrator {
    store: Arc<ConsultationStore>,
    transcriber: Arc<dyn Transcriber + Send + Sync>,
    context_source: Arc<dyn ContextSource + Send + Sync>,
    generator: Arc<dyn LetterGenerator + Send + Sync>,
    accelerator: Arc<dyn AcceleratorCache + Send + Sync>,
    settings: Settings,
}

impl PipelineOrchestrator {
    pub fn new(
        transcriber: Arc<dyn Transcriber + Send + Sync>,
        context_source: Arc<dyn ContextSource + Send + Sync>,
        generator: Arc<dyn LetterGenerator + Send + Sync>,
        accelerator: Arc<dyn AcceleratorCache + Send + Sync>,
        settings: Settings,
    ) -> Self {
        Self {
            store: Arc::new(ConsultationStore::new()),
            transcriber,
            context_source,
            generator,
            accelerator,
            settings,
        }
    }

    /// Wire the live collaborators: speech sidecar, FHIR server, and the
    /// Ollama letter model.
    pub fn with_live_collaborators(settings: Settings) -> Self {
        let transcriber = Arc::new(HttpTranscriber::new(
            &settings.asr_server_url,
            settings.asr_timeout_s,
        ));
        let context_source = Arc::new(FhirContextSource::new(FhirClient::new(
            &settings.fhir_server_url,
            settings.fhir_timeout_s,
        )));
        let generator = Arc::new(OllamaGenerator::new(
            &settings.llm_server_url,
            &settings.llm_model,
            settings.llm_timeout_s,
        ));
        let accelerator = Arc::new(OllamaAcceleratorCache::new(
            &settings.llm_server_url,
            &settings.llm_model,
            ACCELERATOR_TIMEOUT_S,
        ));
        Self::new(transcriber, context_source, generator, accelerator, settings)
    }

    /// Wire deterministic fixtures covering the demo clinic; nothing
    /// external is contacted.
    pub fn with_fixture_collaborators(settings: Settings) -> Self {
        Self::new(
            Arc::new(FixtureTranscriber),
            Arc::new(FixtureContextSource),
            Arc::new(FixtureGenerator::new()),
            Arc::new(NoopAcceleratorCache),
            settings,
        )
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Create a consultation in recording state for the selected patient.
    pub fn start_consultation(&self, patient: Patient) -> Result<Consultation, PipelineError> {
        let consultation_id = format!("cons-{}", Uuid::new_v4());
        let consultation = Consultation::new(consultation_id.clone(), patient);
        self.store.insert(consultation.clone())?;
        self.store.set_progress(PipelineProgress::new(
            &consultation_id,
            PipelineStage::RetrievingContext,
            5,
            "Consultation started. Recording in progress.",
        ))?;
        tracing::info!(
            consultation_id = %consultation_id,
            patient_id = %consultation.patient.id,
            "Consultation started"
        );
        Ok(consultation)
    }

    /// Record where the finished recording was stored.
    pub fn attach_audio(
        &self,
        consultation_id: &str,
        audio_path: &str,
    ) -> Result<Consultation, PipelineError> {
        self.store.update(consultation_id, |c| {
            c.audio_path = Some(audio_path.to_string());
        })
    }

    /// Preload patient context while recording continues, to cut
    /// end-of-consultation latency. Retrieval failures are swallowed; the
    /// pipeline will retry or degrade later.
    pub fn prefetch_context(&self, consultation_id: &str) -> Result<(), PipelineError> {
        let consultation = self.store.get(consultation_id)?;
        if consultation.context.is_some() {
            return Ok(());
        }

        match self
            .context_source
            .fetch_patient_context(&consultation.patient.id)
        {
            Ok(context) => {
                self.store.update(consultation_id, |c| {
                    c.context = Some(context.clone());
                })?;
                self.store.set_progress(PipelineProgress::new(
                    consultation_id,
                    PipelineStage::RetrievingContext,
                    25,
                    "Patient context prefetched.",
                ))?;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    consultation_id = %consultation_id,
                    error = %e,
                    "Context prefetch failed"
                );
                Ok(())
            }
        }
    }

    /// Finalize recording and run the full pipeline under the global
    /// timeout.
    ///
    /// The pipeline body runs on a blocking worker; if the timeout fires
    /// first the worker is abandoned rather than cancelled, so a stuck
    /// collaborator call may finish in the background and its stage
    /// writes still land. The caller gets a timeout error either way.
    pub async fn end_consultation(
        &self,
        consultation_id: &str,
    ) -> Result<Consultation, PipelineError> {
        let consultation = self.store.get(consultation_id)?;
        if consultation.audio_path.is_none() {
            return Err(no_audio_error());
        }

        self.store.update(consultation_id, |c| {
            c.status = ConsultationStatus::Processing;
            c.ended_at = Some(Utc::now());
        })?;

        let deps = PipelineDeps {
            store: Arc::clone(&self.store),
            transcriber: Arc::clone(&self.transcriber),
            context_source: Arc::clone(&self.context_source),
            generator: Arc::clone(&self.generator),
            accelerator: Arc::clone(&self.accelerator),
            context_budget_tokens: self.settings.context_budget_tokens,
            doc_gen_max_tokens: self.settings.doc_gen_max_tokens,
        };
        let id = consultation_id.to_string();
        let worker = tokio::task::spawn_blocking(move || run_pipeline(&deps, &id));

        let timeout = Duration::from_secs(self.settings.pipeline_timeout_s);
        match tokio::time::timeout(timeout, worker).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(PipelineError::ModelExecution(format!(
                "Pipeline execution failed: {join_error}"
            ))),
            Err(_elapsed) => {
                tracing::warn!(
                    consultation_id = %consultation_id,
                    timeout_s = self.settings.pipeline_timeout_s,
                    "Pipeline exceeded the global timeout; worker left to finish in background"
                );
                Err(PipelineError::Timeout(self.settings.pipeline_timeout_s))
            }
        }
    }

    // ── Reads ────────────────────────────────────────────────────────────

    pub fn consultation(&self, consultation_id: &str) -> Result<Consultation, PipelineError> {
        self.store.get(consultation_id)
    }

    pub fn progress(&self, consultation_id: &str) -> Result<PipelineProgress, PipelineError> {
        self.store.progress(consultation_id)
    }

    // ── Document review ──────────────────────────────────────────────────

    /// Replace the document's whole section list with the clinician's
    /// edits. Statuses are untouched; sign-off is a separate step.
    pub fn update_document_sections(
        &self,
        consultation_id: &str,
        sections: Vec<DocumentSection>,
    ) -> Result<ClinicalDocument, PipelineError> {
        let consultation = self.store.get(consultation_id)?;
        if consultation.document.is_none() {
            return Err(no_document_error());
        }

        let updated = self.store.update(consultation_id, |c| {
            if let Some(document) = c.document.as_mut() {
                document.sections = sections.clone();
            }
        })?;
        updated.document.ok_or_else(no_document_error)
    }

    /// Lock the reviewed document: both the consultation and the document
    /// move to signed_off.
    pub fn sign_off_document(&self, consultation_id: &str) -> Result<Consultation, PipelineError> {
        let consultation = self.store.get(consultation_id)?;
        if consultation.document.is_none() {
            return Err(no_document_error());
        }

        let signed = self.store.update(consultation_id, |c| {
            c.status = ConsultationStatus::SignedOff;
            if let Some(document) = c.document.as_mut() {
                document.status = ConsultationStatus::SignedOff;
            }
        })?;
        tracing::info!(consultation_id = %consultation_id, "Document signed off");
        Ok(signed)
    }

    /// Re-run generation and splice one section of the fresh output into
    /// the existing document by heading match.
    ///
    /// The stored context is re-budgeted into a transient copy so repeated
    /// regenerations never stack truncation warnings on the consultation.
    pub fn regenerate_document_section(
        &self,
        consultation_id: &str,
        heading: &str,
    ) -> Result<ClinicalDocument, PipelineError> {
        let consultation = self.store.get(consultation_id)?;
        let (transcript, context, document) = match (
            consultation.transcript,
            consultation.context,
            consultation.document,
        ) {
            (Some(t), Some(c), Some(d)) => (t, c, d),
            _ => {
                return Err(PipelineError::ModelExecution(
                    "Transcript, context, and document are required for section regeneration"
                        .to_string(),
                ))
            }
        };

        let budgeted = fit_to_budget(context, self.settings.context_budget_tokens);
        let fresh = generate_letter(
            self.generator.as_ref(),
            self.accelerator.as_ref(),
            consultation_id,
            &transcript,
            &budgeted,
            self.settings.doc_gen_max_tokens,
        )
        .map_err(|e| PipelineError::ModelExecution(e.to_string()))?;

        let fresh_index = fresh.section_index(heading).ok_or_else(|| {
            PipelineError::ModelExecution(format!(
                "Section '{heading}' was not produced by regeneration"
            ))
        })?;
        let existing_index = document.section_index(heading).ok_or_else(|| {
            PipelineError::ModelExecution(format!(
                "Section '{heading}' does not exist in the current document"
            ))
        })?;
        let replacement = fresh.sections[fresh_index].clone();

        let updated = self.store.update(consultation_id, |c| {
            c.status = ConsultationStatus::Review;
            if let Some(doc) = c.document.as_mut() {
                doc.sections[existing_index] = replacement.clone();
                doc.generated_at = fresh.generated_at;
                doc.generation_time_s = fresh.generation_time_s;
                doc.status = ConsultationStatus::Review;
            }
        })?;
        tracing::info!(
            consultation_id = %consultation_id,
            heading = %heading,
            "Document section regenerated"
        );
        updated.document.ok_or_else(no_document_error)
    }

    // ── Health ───────────────────────────────────────────────────────────

    pub fn health(&self) -> Result<HealthStatus, PipelineError> {
        Ok(HealthStatus {
            status: "healthy".to_string(),
            active_consultations: self.store.count()?,
            gpu: self.accelerator.status(),
            timestamp: Utc::now(),
        })
    }
}

fn no_document_error() -> PipelineError {
    PipelineError::ModelExecution(
        "No generated document available for this consultation".to_string(),
    )
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Transcript;
    use crate::pipeline::sections::SECTION_PLACEHOLDER;
    use crate::pipeline::transcribe::TranscriptionError;

    fn thompson() -> Patient {
        Patient {
            id: "pt-001".to_string(),
            nhs_number: "943-476-5829".to_string(),
            name: "Mrs Margaret Thompson".to_string(),
            date_of_birth: "14/03/1959".to_string(),
            age: 67,
            sex: "Female".to_string(),
            appointment_time: "09:30".to_string(),
            summary: "T2DM annual review".to_string(),
        }
    }

    fn fixture_orchestrator() -> PipelineOrchestrator {
        PipelineOrchestrator::with_fixture_collaborators(Settings::default())
    }

    async fn consultation_in_review(
        orchestrator: &PipelineOrchestrator,
    ) -> Consultation {
        let consultation = orchestrator.start_consultation(thompson()).unwrap();
        orchestrator
            .attach_audio(&consultation.id, "data/uploads/mrs_thompson.wav")
            .unwrap();
        orchestrator.end_consultation(&consultation.id).await.unwrap()
    }

    /// Transcriber that stalls long enough to trip a short timeout.
    struct SleepyTranscriber {
        delay: Duration,
    }

    impl Transcriber for SleepyTranscriber {
        fn transcribe(&self, _audio_path: &str) -> Result<Transcript, TranscriptionError> {
            std::thread::sleep(self.delay);
            Ok(Transcript::new("stem", "Recovered late transcript.".into(), 5.0))
        }
    }

    #[test]
    fn start_consultation_registers_recording_state_and_progress() {
        let orchestrator = fixture_orchestrator();

        let consultation = orchestrator.start_consultation(thompson()).unwrap();

        assert!(consultation.id.starts_with("cons-"));
        assert_eq!(consultation.status, ConsultationStatus::Recording);
        let progress = orchestrator.progress(&consultation.id).unwrap();
        assert_eq!(progress.progress_pct, 5);
        assert_eq!(progress.message, "Consultation started. Recording in progress.");
    }

    #[test]
    fn consultation_ids_are_unique() {
        let orchestrator = fixture_orchestrator();
        let first = orchestrator.start_consultation(thompson()).unwrap();
        let second = orchestrator.start_consultation(thompson()).unwrap();
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn prefetch_stores_context_and_reports_progress() {
        let orchestrator = fixture_orchestrator();
        let consultation = orchestrator.start_consultation(thompson()).unwrap();

        orchestrator.prefetch_context(&consultation.id).unwrap();

        let stored = orchestrator.consultation(&consultation.id).unwrap();
        assert!(stored.context.is_some());
        let progress = orchestrator.progress(&consultation.id).unwrap();
        assert_eq!(progress.progress_pct, 25);
        assert_eq!(progress.message, "Patient context prefetched.");
    }

    #[test]
    fn prefetch_failure_is_swallowed() {
        let orchestrator = fixture_orchestrator();
        let mut unknown = thompson();
        unknown.id = "pt-999".to_string();
        let consultation = orchestrator.start_consultation(unknown).unwrap();

        orchestrator.prefetch_context(&consultation.id).unwrap();

        let stored = orchestrator.consultation(&consultation.id).unwrap();
        assert!(stored.context.is_none());
        assert_eq!(orchestrator.progress(&consultation.id).unwrap().progress_pct, 5);
    }

    #[tokio::test]
    async fn end_consultation_runs_pipeline_to_review() {
        let orchestrator = fixture_orchestrator();

        let finished = consultation_in_review(&orchestrator).await;

        assert_eq!(finished.status, ConsultationStatus::Review);
        assert_eq!(finished.pipeline_stage, Some(PipelineStage::Complete));
        assert!(finished.ended_at.is_some());
        let document = finished.document.unwrap();
        assert!(document.sections.len() >= 4);
        assert_eq!(document.status, ConsultationStatus::Review);
        assert_eq!(
            orchestrator.progress(&finished.id).unwrap().progress_pct,
            100
        );
    }

    #[tokio::test]
    async fn end_consultation_without_audio_fails() {
        let orchestrator = fixture_orchestrator();
        let consultation = orchestrator.start_consultation(thompson()).unwrap();

        let err = orchestrator.end_consultation(&consultation.id).await.unwrap_err();

        assert!(matches!(err, PipelineError::ModelExecution(msg)
            if msg.contains("No uploaded audio")));
    }

    #[tokio::test]
    async fn end_consultation_unknown_id_is_not_found() {
        let orchestrator = fixture_orchestrator();
        let err = orchestrator.end_consultation("cons-missing").await.unwrap_err();
        assert!(matches!(err, PipelineError::ConsultationNotFound(_)));
    }

    #[tokio::test]
    async fn slow_pipeline_times_out_and_leaves_partial_state() {
        let mut settings = Settings::default();
        settings.pipeline_timeout_s = 1;
        let orchestrator = PipelineOrchestrator::new(
            Arc::new(SleepyTranscriber {
                delay: Duration::from_secs(3),
            }),
            Arc::new(FixtureContextSource),
            Arc::new(FixtureGenerator::new()),
            Arc::new(NoopAcceleratorCache),
            settings,
        );
        let consultation = orchestrator.start_consultation(thompson()).unwrap();
        orchestrator
            .attach_audio(&consultation.id, "audio.wav")
            .unwrap();

        let err = orchestrator.end_consultation(&consultation.id).await.unwrap_err();

        assert!(matches!(err, PipelineError::Timeout(1)));
        let stored = orchestrator.consultation(&consultation.id).unwrap();
        assert_eq!(stored.status, ConsultationStatus::Processing);
        assert!(stored.document.is_none());
        // The transcribe stage had announced itself before stalling.
        assert_eq!(orchestrator.progress(&consultation.id).unwrap().progress_pct, 33);
    }

    #[tokio::test]
    async fn sign_off_locks_consultation_and_document() {
        let orchestrator = fixture_orchestrator();
        let finished = consultation_in_review(&orchestrator).await;

        let signed = orchestrator.sign_off_document(&finished.id).unwrap();

        assert_eq!(signed.status, ConsultationStatus::SignedOff);
        assert_eq!(
            signed.document.unwrap().status,
            ConsultationStatus::SignedOff
        );
    }

    #[test]
    fn sign_off_without_document_fails() {
        let orchestrator = fixture_orchestrator();
        let consultation = orchestrator.start_consultation(thompson()).unwrap();

        let err = orchestrator.sign_off_document(&consultation.id).unwrap_err();

        assert!(matches!(err, PipelineError::ModelExecution(msg)
            if msg.contains("No generated document")));
    }

    #[tokio::test]
    async fn update_document_sections_replaces_list_without_touching_status() {
        let orchestrator = fixture_orchestrator();
        let finished = consultation_in_review(&orchestrator).await;
        let mut edited = finished.document.clone().unwrap().sections;
        edited[0].content = "Edited by the reviewing clinician.".to_string();

        let document = orchestrator
            .update_document_sections(&finished.id, edited.clone())
            .unwrap();

        assert_eq!(document.sections[0].content, "Edited by the reviewing clinician.");
        assert_eq!(document.status, ConsultationStatus::Review);
        let stored = orchestrator.consultation(&finished.id).unwrap();
        assert_eq!(stored.status, ConsultationStatus::Review);
        assert_eq!(stored.document.unwrap().sections, edited);
    }

    #[tokio::test]
    async fn regenerate_replaces_exactly_one_section() {
        let orchestrator = fixture_orchestrator();
        let finished = consultation_in_review(&orchestrator).await;
        let original = finished.document.clone().unwrap();

        let regenerated = orchestrator
            .regenerate_document_section(&finished.id, "assessment and plan")
            .unwrap();

        assert_eq!(regenerated.sections.len(), original.sections.len());
        for (index, section) in regenerated.sections.iter().enumerate() {
            assert_eq!(section.heading, original.sections[index].heading);
        }
        assert_eq!(regenerated.status, ConsultationStatus::Review);
        assert_eq!(
            orchestrator.consultation(&finished.id).unwrap().status,
            ConsultationStatus::Review
        );
    }

    #[tokio::test]
    async fn regenerate_after_sign_off_returns_to_review() {
        let orchestrator = fixture_orchestrator();
        let finished = consultation_in_review(&orchestrator).await;
        orchestrator.sign_off_document(&finished.id).unwrap();

        orchestrator
            .regenerate_document_section(&finished.id, "Assessment and plan")
            .unwrap();

        let stored = orchestrator.consultation(&finished.id).unwrap();
        assert_eq!(stored.status, ConsultationStatus::Review);
        assert_eq!(stored.document.unwrap().status, ConsultationStatus::Review);
    }

    #[tokio::test]
    async fn regenerate_fails_when_fresh_output_lacks_the_heading() {
        let orchestrator = fixture_orchestrator();
        let finished = consultation_in_review(&orchestrator).await;
        // The fixture letter only ever produces the known headings, so any
        // other heading is missing from the fresh output.
        let err = orchestrator
            .regenerate_document_section(&finished.id, "Social history")
            .unwrap_err();

        assert!(matches!(err, PipelineError::ModelExecution(msg)
            if msg.contains("was not produced by regeneration")));
    }

    #[tokio::test]
    async fn regenerate_fails_when_existing_document_lacks_the_heading() {
        let orchestrator = fixture_orchestrator();
        let finished = consultation_in_review(&orchestrator).await;
        let trimmed: Vec<DocumentSection> = finished
            .document
            .clone()
            .unwrap()
            .sections
            .into_iter()
            .filter(|s| s.heading != "Current medications")
            .collect();
        orchestrator
            .update_document_sections(&finished.id, trimmed)
            .unwrap();

        let err = orchestrator
            .regenerate_document_section(&finished.id, "Current medications")
            .unwrap_err();

        assert!(matches!(err, PipelineError::ModelExecution(msg)
            if msg.contains("does not exist in the current document")));
    }

    #[test]
    fn regenerate_before_pipeline_completion_fails() {
        let orchestrator = fixture_orchestrator();
        let consultation = orchestrator.start_consultation(thompson()).unwrap();

        let err = orchestrator
            .regenerate_document_section(&consultation.id, "Assessment and plan")
            .unwrap_err();

        assert!(matches!(err, PipelineError::ModelExecution(msg)
            if msg.contains("required for section regeneration")));
    }

    #[tokio::test]
    async fn health_reports_store_size_and_accelerator() {
        let orchestrator = fixture_orchestrator();
        consultation_in_review(&orchestrator).await;

        let health = orchestrator.health().unwrap();

        assert_eq!(health.status, "healthy");
        assert_eq!(health.active_consultations, 1);
        assert_eq!(health.gpu, AcceleratorStatus::unavailable());
    }

    #[test]
    fn consultations_never_leave_the_store() {
        let orchestrator = fixture_orchestrator();
        let consultation = orchestrator.start_consultation(thompson()).unwrap();
        // No delete operation exists; the record outlives every stage.
        assert!(orchestrator.consultation(&consultation.id).is_ok());
        assert_eq!(orchestrator.health().unwrap().active_consultations, 1);
    }

    #[test]
    fn unbudgeted_placeholder_sections_stay_editable() {
        let placeholder = DocumentSection::new("Examination findings", SECTION_PLACEHOLDER);
        assert!(placeholder.editable);
    }
}
