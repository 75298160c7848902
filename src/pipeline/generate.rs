use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::models::{ClinicalDocument, ConsultationStatus, DocumentSection, PatientContext, Transcript};

use super::accelerator::AcceleratorCache;
use super::sections::{parse_sections, KNOWN_SECTION_HEADINGS, SECTION_PLACEHOLDER};

/// Clinician identity stamped onto every generated letter.
pub const CLINICIAN_NAME: &str = "Dr. Sarah Chen";
pub const CLINICIAN_TITLE: &str = "Consultant Diabetologist";

/// Smallest output budget the exhaustion retry will fall back to.
const MIN_RETRY_TOKENS: u32 = 256;

/// Response fragments that mark an out-of-memory class of failure.
const OOM_MARKERS: &[&str] = &["out of memory", "unable to allocate", "insufficient memory"];

/// Errors from the letter-generation collaborator.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Generation ran out of accelerator memory: {0}")]
    ResourceExhausted(String),

    #[error("Cannot reach generation service at {0}")]
    Connection(String),

    #[error("Generation request timed out after {0}s")]
    Timeout(u64),

    #[error("Generation service error (HTTP {status}): {body}")]
    Service { status: u16, body: String },

    #[error("Malformed generation response: {0}")]
    MalformedResponse(String),
}

/// Letter-generation capability: rendered prompt in, raw letter text out.
pub trait LetterGenerator {
    fn generate(&self, prompt: &str, max_new_tokens: u32) -> Result<String, GenerationError>;
}

// ---------------------------------------------------------------------------
// Prompt assembly
// ---------------------------------------------------------------------------

/// Render the document-generation prompt from transcript and context.
pub fn render_prompt(transcript: &str, context: &PatientContext) -> String {
    let context_json = serde_json::to_string_pretty(context).unwrap_or_default();
    let letter_date = Utc::now().format("%d %b %Y");
    format!(
        "<|system|>\n\
         You are an NHS clinical documentation assistant. Draft a clinic letter to the \
         patient's GP from the consultation transcript and the structured patient context \
         below. Write in British English with a professional clinical register. Structure \
         the letter using exactly these section headings: {headings}. State only findings \
         supported by the transcript or the context; never invent results.\n\
         <|user|>\n\
         Letter date: {letter_date}\n\
         Clinician: {clinician_name}, {clinician_title}\n\
         \n\
         PATIENT CONTEXT:\n\
         {context_json}\n\
         \n\
         CONSULTATION TRANSCRIPT:\n\
         {transcript}\n\
         <|assistant|>\n",
        headings = KNOWN_SECTION_HEADINGS.join(", "),
        letter_date = letter_date,
        clinician_name = CLINICIAN_NAME,
        clinician_title = CLINICIAN_TITLE,
        context_json = context_json,
        transcript = transcript,
    )
}

// ---------------------------------------------------------------------------
// Ollama-backed generator
// ---------------------------------------------------------------------------

/// Ollama HTTP client running the letter-generation model locally.
pub struct OllamaGenerator {
    base_url: String,
    model: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

/// Sampling parameters tuned for clinical letter drafting.
#[derive(Serialize)]
struct OllamaOptions {
    num_predict: u32,
    temperature: f64,
    top_p: f64,
    top_k: u32,
    repeat_penalty: f64,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

impl OllamaGenerator {
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
            timeout_secs,
        }
    }
}

impl LetterGenerator for OllamaGenerator {
    fn generate(&self, prompt: &str, max_new_tokens: u32) -> Result<String, GenerationError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaGenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: OllamaOptions {
                num_predict: max_new_tokens,
                temperature: 0.3,
                top_p: 0.9,
                top_k: 40,
                repeat_penalty: 1.1,
            },
        };

        let response = self.client.post(&url).json(&body).send().map_err(|e| {
            if e.is_connect() {
                GenerationError::Connection(self.base_url.clone())
            } else if e.is_timeout() {
                GenerationError::Timeout(self.timeout_secs)
            } else {
                GenerationError::MalformedResponse(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_failure(status.as_u16(), body));
        }

        let parsed: OllamaGenerateResponse = response
            .json()
            .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;

        Ok(parsed.response.trim().to_string())
    }
}

/// Distinguish out-of-memory failures, which are retried once, from
/// everything else, which is fatal.
fn classify_failure(status: u16, body: String) -> GenerationError {
    let lowered = body.to_lowercase();
    if OOM_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        GenerationError::ResourceExhausted(body)
    } else {
        GenerationError::Service { status, body }
    }
}

// ---------------------------------------------------------------------------
// Fixture-backed generator
// ---------------------------------------------------------------------------

const REFERENCE_LETTER: &str = "History of presenting complaint\n\
Mrs Thompson reported worsening fatigue and reduced exercise tolerance over the last three months. \
She confirmed she is taking metformin and gliclazide but occasionally misses evening doses.\n\n\
Examination findings\n\
No acute distress was described during the consultation. She denied chest pain, syncope, or focal neurological symptoms.\n\n\
Investigation results\n\
Recent blood results showed HbA1c 55 mmol/mol with eGFR 52 mL/min/1.73m\u{b2}. \
Penicillin allergy with previous anaphylaxis was reconfirmed.\n\n\
Assessment and plan\n\
Overall picture is suboptimal glycaemic control with associated fatigue. Plan is lifestyle reinforcement, medicine adherence review, \
repeat renal profile in 3 months, and consideration of treatment escalation if HbA1c remains above target.\n\n\
Current medications\n\
Metformin 1 g twice daily; Gliclazide 80 mg twice daily.";

/// Deterministic generator for demo clinics and offline tests.
pub struct FixtureGenerator {
    letter: String,
}

impl FixtureGenerator {
    pub fn new() -> Self {
        Self {
            letter: REFERENCE_LETTER.to_string(),
        }
    }

    /// Override the canned letter, for exercising parser edge cases.
    pub fn with_letter(letter: &str) -> Self {
        Self {
            letter: letter.to_string(),
        }
    }
}

impl Default for FixtureGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl LetterGenerator for FixtureGenerator {
    fn generate(&self, _prompt: &str, _max_new_tokens: u32) -> Result<String, GenerationError> {
        Ok(self.letter.clone())
    }
}

// ---------------------------------------------------------------------------
// Letter assembly
// ---------------------------------------------------------------------------

/// Run generation and assemble the final document.
///
/// On resource exhaustion the accelerator cache is released and generation
/// is retried exactly once with the output budget halved (floor 256
/// tokens). Any other failure is fatal. Parsed sections are padded with
/// placeholders up to the four-section minimum before the document is
/// built.
pub fn generate_letter(
    generator: &dyn LetterGenerator,
    accelerator: &dyn AcceleratorCache,
    consultation_id: &str,
    transcript: &Transcript,
    context: &PatientContext,
    max_new_tokens: u32,
) -> Result<ClinicalDocument, GenerationError> {
    let prompt = render_prompt(&transcript.text, context);
    let started = Instant::now();

    let generated_text = match generator.generate(&prompt, max_new_tokens) {
        Ok(text) => text,
        Err(GenerationError::ResourceExhausted(reason)) => {
            let retry_tokens = (max_new_tokens / 2).max(MIN_RETRY_TOKENS);
            tracing::warn!(
                consultation_id = %consultation_id,
                retry_tokens,
                reason = %reason,
                "Generation exhausted accelerator memory; releasing cache and retrying once"
            );
            accelerator.release();
            generator.generate(&prompt, retry_tokens)?
        }
        Err(other) => return Err(other),
    };

    let mut sections = parse_sections(&generated_text);
    pad_sections(&mut sections);

    let generation_time_s = (started.elapsed().as_secs_f64() * 1000.0).round() / 1000.0;
    Ok(build_document(
        consultation_id,
        context,
        sections,
        generation_time_s,
    ))
}

/// Pad an under-produced section list with placeholder sections until it
/// reaches the four-section minimum, drawing missing known headings in
/// order.
pub fn pad_sections(sections: &mut Vec<DocumentSection>) {
    for heading in KNOWN_SECTION_HEADINGS {
        if sections.len() >= 4 {
            break;
        }
        let present = sections
            .iter()
            .any(|s| s.heading.eq_ignore_ascii_case(heading));
        if !present {
            sections.push(DocumentSection::new(heading, SECTION_PLACEHOLDER));
        }
    }
}

/// Assemble the final document from parsed sections and context demographics.
pub fn build_document(
    consultation_id: &str,
    context: &PatientContext,
    sections: Vec<DocumentSection>,
    generation_time_s: f64,
) -> ClinicalDocument {
    let patient_name = match context.demographic("name") {
        name if name.is_empty() => "Unknown patient".to_string(),
        name => name,
    };

    ClinicalDocument {
        consultation_id: consultation_id.to_string(),
        letter_date: Utc::now().format("%Y-%m-%d").to_string(),
        patient_name,
        patient_dob: context.demographic("dob"),
        nhs_number: context.demographic("nhs_number"),
        addressee: "GP Practice".to_string(),
        salutation: "Dear Dr.,".to_string(),
        sections,
        medications_list: context.medication_names(),
        sign_off: format!("{CLINICIAN_NAME}, {CLINICIAN_TITLE}"),
        status: ConsultationStatus::Review,
        generated_at: Utc::now(),
        generation_time_s,
        discrepancies: Vec::new(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::pipeline::accelerator::{AcceleratorStatus, NoopAcceleratorCache};
    use crate::pipeline::retrieve::{ContextSource, FixtureContextSource};

    fn thompson_context() -> PatientContext {
        FixtureContextSource.fetch_patient_context("pt-001").unwrap()
    }

    fn thompson_transcript() -> Transcript {
        Transcript::new("cons-1", "Discussed fatigue and gliclazide adherence.".into(), 62.0)
    }

    /// Generator that fails with configured errors before succeeding,
    /// recording the token budget of every call.
    struct FlakyGenerator {
        failures: RefCell<Vec<GenerationError>>,
        calls: RefCell<Vec<u32>>,
    }

    impl FlakyGenerator {
        fn failing_with(failures: Vec<GenerationError>) -> Self {
            Self {
                failures: RefCell::new(failures),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl LetterGenerator for FlakyGenerator {
        fn generate(&self, _prompt: &str, max_new_tokens: u32) -> Result<String, GenerationError> {
            self.calls.borrow_mut().push(max_new_tokens);
            match self.failures.borrow_mut().pop() {
                Some(err) => Err(err),
                None => Ok(REFERENCE_LETTER.to_string()),
            }
        }
    }

    /// Accelerator cache that counts release calls.
    struct CountingCache {
        releases: Cell<u32>,
    }

    impl CountingCache {
        fn new() -> Self {
            Self {
                releases: Cell::new(0),
            }
        }
    }

    impl AcceleratorCache for CountingCache {
        fn release(&self) {
            self.releases.set(self.releases.get() + 1);
        }

        fn status(&self) -> AcceleratorStatus {
            AcceleratorStatus::unavailable()
        }
    }

    #[test]
    fn reference_letter_parses_into_all_known_sections() {
        let sections = parse_sections(REFERENCE_LETTER);
        assert_eq!(sections.len(), KNOWN_SECTION_HEADINGS.len());
        assert!(sections
            .iter()
            .zip(KNOWN_SECTION_HEADINGS)
            .all(|(section, heading)| section.heading == heading));
    }

    #[test]
    fn prompt_carries_transcript_context_and_clinician() {
        let prompt = render_prompt("Discussed fatigue and thirst.", &thompson_context());

        assert!(prompt.starts_with("<|system|>"));
        assert!(prompt.contains("NHS clinical documentation assistant"));
        assert!(prompt.contains("Discussed fatigue and thirst."));
        assert!(prompt.contains("\"HbA1c\""));
        assert!(prompt.contains("Dr. Sarah Chen, Consultant Diabetologist"));
        assert!(prompt.contains("History of presenting complaint"));
    }

    #[test]
    fn successful_generation_builds_review_document() {
        let generator = FixtureGenerator::new();
        let document = generate_letter(
            &generator,
            &NoopAcceleratorCache,
            "cons-1",
            &thompson_transcript(),
            &thompson_context(),
            2048,
        )
        .unwrap();

        assert_eq!(document.consultation_id, "cons-1");
        assert_eq!(document.status, ConsultationStatus::Review);
        assert_eq!(document.sections.len(), 5);
        assert_eq!(document.patient_name, "Mrs Margaret Thompson");
        assert_eq!(document.nhs_number, "943-476-5829");
        assert_eq!(
            document.medications_list,
            vec!["Metformin".to_string(), "Gliclazide".to_string()]
        );
        assert_eq!(document.sign_off, "Dr. Sarah Chen, Consultant Diabetologist");
        assert_eq!(document.salutation, "Dear Dr.,");
        assert!(document.discrepancies.is_empty());
    }

    #[test]
    fn resource_exhaustion_releases_cache_and_retries_with_halved_budget() {
        let generator = FlakyGenerator::failing_with(vec![GenerationError::ResourceExhausted(
            "CUDA out of memory".into(),
        )]);
        let cache = CountingCache::new();

        let document = generate_letter(
            &generator,
            &cache,
            "cons-1",
            &thompson_transcript(),
            &thompson_context(),
            2048,
        )
        .unwrap();

        assert_eq!(*generator.calls.borrow(), vec![2048, 1024]);
        assert_eq!(cache.releases.get(), 1);
        assert_eq!(document.sections.len(), 5);
    }

    #[test]
    fn retry_budget_never_falls_below_the_floor() {
        let generator = FlakyGenerator::failing_with(vec![GenerationError::ResourceExhausted(
            "out of memory".into(),
        )]);

        generate_letter(
            &generator,
            &NoopAcceleratorCache,
            "cons-1",
            &thompson_transcript(),
            &thompson_context(),
            300,
        )
        .unwrap();

        assert_eq!(*generator.calls.borrow(), vec![300, 256]);
    }

    #[test]
    fn second_exhaustion_is_fatal() {
        let generator = FlakyGenerator::failing_with(vec![
            GenerationError::ResourceExhausted("out of memory".into()),
            GenerationError::ResourceExhausted("out of memory".into()),
        ]);
        let cache = CountingCache::new();

        let err = generate_letter(
            &generator,
            &cache,
            "cons-1",
            &thompson_transcript(),
            &thompson_context(),
            2048,
        )
        .unwrap_err();

        assert!(matches!(err, GenerationError::ResourceExhausted(_)));
        assert_eq!(generator.calls.borrow().len(), 2);
        assert_eq!(cache.releases.get(), 1);
    }

    #[test]
    fn generic_failure_is_not_retried() {
        let generator = FlakyGenerator::failing_with(vec![GenerationError::Service {
            status: 500,
            body: "model crashed".into(),
        }]);
        let cache = CountingCache::new();

        let err = generate_letter(
            &generator,
            &cache,
            "cons-1",
            &thompson_transcript(),
            &thompson_context(),
            2048,
        )
        .unwrap_err();

        assert!(matches!(err, GenerationError::Service { status: 500, .. }));
        assert_eq!(generator.calls.borrow().len(), 1);
        assert_eq!(cache.releases.get(), 0);
    }

    #[test]
    fn under_produced_output_is_padded_to_four_sections() {
        let partial = "History of presenting complaint\nSeen today.\n\n\
                       Assessment and plan\nContinue current therapy.\n";
        let generator = FixtureGenerator::with_letter(partial);

        let document = generate_letter(
            &generator,
            &NoopAcceleratorCache,
            "cons-1",
            &thompson_transcript(),
            &thompson_context(),
            2048,
        )
        .unwrap();

        assert_eq!(document.sections.len(), 4);
        let placeholders: Vec<&str> = document
            .sections
            .iter()
            .filter(|s| s.content == SECTION_PLACEHOLDER)
            .map(|s| s.heading.as_str())
            .collect();
        assert_eq!(placeholders, vec!["Examination findings", "Investigation results"]);
    }

    #[test]
    fn oom_classification_checks_response_body() {
        assert!(matches!(
            classify_failure(500, "CUDA error: out of memory".into()),
            GenerationError::ResourceExhausted(_)
        ));
        assert!(matches!(
            classify_failure(500, "llama runner process has terminated: unable to allocate CUDA buffer".into()),
            GenerationError::ResourceExhausted(_)
        ));
        assert!(matches!(
            classify_failure(404, "model 'medgemma:27b' not found".into()),
            GenerationError::Service { status: 404, .. }
        ));
    }

    #[test]
    fn missing_demographics_fall_back_to_unknown_patient() {
        let document = build_document("cons-2", &PatientContext::empty("pt-009"), Vec::new(), 0.5);

        assert_eq!(document.patient_name, "Unknown patient");
        assert_eq!(document.patient_dob, "");
        assert_eq!(document.nhs_number, "");
        assert!(document.medications_list.is_empty());
    }

    #[test]
    fn ollama_generator_trims_trailing_slash() {
        let generator = OllamaGenerator::new("http://localhost:11434/", "medgemma:27b", 300);
        assert_eq!(generator.base_url, "http://localhost:11434");
        assert_eq!(generator.model, "medgemma:27b");
        assert_eq!(generator.timeout_secs, 300);
    }
}
