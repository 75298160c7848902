use std::sync::Arc;

use crate::models::{Consultation, ConsultationStatus, PipelineProgress, PipelineStage};

use super::accelerator::AcceleratorCache;
use super::budget::fit_to_budget;
use super::generate::{generate_letter, LetterGenerator};
use super::retrieve::{fallback_context, ContextSource};
use super::store::ConsultationStore;
use super::transcribe::Transcriber;
use super::PipelineError;

/// Everything the blocking pipeline body needs, cloned into the worker task.
pub(crate) struct PipelineDeps {
    pub store: Arc<ConsultationStore>,
    pub transcriber: Arc<dyn Transcriber + Send + Sync>,
    pub context_source: Arc<dyn ContextSource + Send + Sync>,
    pub generator: Arc<dyn LetterGenerator + Send + Sync>,
    pub accelerator: Arc<dyn AcceleratorCache + Send + Sync>,
    pub context_budget_tokens: usize,
    pub doc_gen_max_tokens: u32,
}

/// The three-stage pipeline body: transcribe, retrieve context, generate.
///
/// Runs as one blocking unit under the caller's timeout. Each stage writes
/// its Progress record before starting and mutates the stored Consultation
/// as it completes, so pollers observe forward motion even if a later
/// stage stalls. Context failures degrade to a fallback; transcription and
/// generation failures are fatal and leave the consultation in
/// `processing` with whatever the completed stages produced.
pub(crate) fn run_pipeline(
    deps: &PipelineDeps,
    consultation_id: &str,
) -> Result<Consultation, PipelineError> {
    let _span = tracing::info_span!("pipeline", consultation_id = %consultation_id).entered();

    let consultation = deps.store.get(consultation_id)?;
    let audio_path = consultation.audio_path.clone().ok_or_else(no_audio_error)?;

    // Stage 1: transcription.
    deps.store.set_progress(PipelineProgress::new(
        consultation_id,
        PipelineStage::Transcribing,
        33,
        "Finalising transcript...",
    ))?;
    deps.store.update(consultation_id, |c| {
        c.pipeline_stage = Some(PipelineStage::Transcribing);
    })?;

    let mut transcript = deps
        .transcriber
        .transcribe(&audio_path)
        .map_err(|e| PipelineError::ModelExecution(e.to_string()))?;
    transcript.consultation_id = consultation_id.to_string();

    if transcript.is_blank() {
        tracing::error!("Transcription produced no usable text");
        return Err(PipelineError::Audio(
            "Consultation audio could not be transcribed".to_string(),
        ));
    }
    tracing::info!(
        word_count = transcript.word_count,
        duration_s = transcript.duration_s,
        "Transcript finalised"
    );
    deps.store.update(consultation_id, |c| {
        c.transcript = Some(transcript.clone());
    })?;
    deps.accelerator.release();

    // Stage 2: context retrieval, degrading to demographics on failure.
    deps.store.set_progress(PipelineProgress::new(
        consultation_id,
        PipelineStage::RetrievingContext,
        66,
        "Synthesising patient context...",
    ))?;
    let consultation = deps.store.update(consultation_id, |c| {
        c.pipeline_stage = Some(PipelineStage::RetrievingContext);
    })?;

    let context = match consultation.context {
        Some(context) => context,
        None => match deps
            .context_source
            .fetch_patient_context(&consultation.patient.id)
        {
            Ok(context) => context,
            Err(e) => {
                tracing::warn!(
                    patient_id = %consultation.patient.id,
                    error = %e,
                    "Context retrieval failed; continuing with fallback demographics"
                );
                fallback_context(&consultation.patient)
            }
        },
    };

    let context = fit_to_budget(context, deps.context_budget_tokens);
    deps.store.update(consultation_id, |c| {
        c.context = Some(context.clone());
    })?;
    deps.accelerator.release();

    // Stage 3: document generation.
    deps.store.set_progress(PipelineProgress::new(
        consultation_id,
        PipelineStage::GeneratingDocument,
        90,
        "Combining transcript and context for document generation...",
    ))?;
    deps.store.update(consultation_id, |c| {
        c.pipeline_stage = Some(PipelineStage::GeneratingDocument);
    })?;

    let document = generate_letter(
        deps.generator.as_ref(),
        deps.accelerator.as_ref(),
        consultation_id,
        &transcript,
        &context,
        deps.doc_gen_max_tokens,
    )
    .map_err(|e| PipelineError::ModelExecution(e.to_string()))?;
    tracing::info!(
        sections = document.sections.len(),
        generation_time_s = document.generation_time_s,
        "Document generated"
    );

    let finished = deps.store.update(consultation_id, |c| {
        c.document = Some(document.clone());
        c.pipeline_stage = Some(PipelineStage::Complete);
        c.status = ConsultationStatus::Review;
    })?;
    deps.store.set_progress(PipelineProgress::new(
        consultation_id,
        PipelineStage::Complete,
        100,
        "Pipeline complete. Document ready for review.",
    ))?;

    Ok(finished)
}

pub(crate) fn no_audio_error() -> PipelineError {
    PipelineError::ModelExecution(
        "No uploaded audio available for this consultation".to_string(),
    )
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
