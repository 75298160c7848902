use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::models::Transcript;

/// Errors from the speech-to-text collaborator.
#[derive(Debug, thiserror::Error)]
pub enum TranscriptionError {
    #[error("Audio path not found: {0}")]
    AudioNotFound(String),

    #[error("Cannot reach transcription service at {0}")]
    Connection(String),

    #[error("Transcription request timed out after {0}s")]
    Timeout(u64),

    #[error("Transcription service error (HTTP {status}): {body}")]
    Service { status: u16, body: String },

    #[error("Malformed transcription response: {0}")]
    MalformedResponse(String),
}

/// Speech-to-text capability over a recorded consultation.
pub trait Transcriber {
    fn transcribe(&self, audio_path: &str) -> Result<Transcript, TranscriptionError>;
}

// ---------------------------------------------------------------------------
// HTTP-backed transcriber
// ---------------------------------------------------------------------------

/// Client for the local speech recognition sidecar.
///
/// The sidecar owns model loading and audio decoding; this client only
/// hands it a path and reads back text plus duration.
pub struct HttpTranscriber {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct TranscriptionRequest<'a> {
    audio_path: &'a str,
    language: &'a str,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
    duration_s: f64,
}

impl HttpTranscriber {
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs,
        }
    }
}

impl Transcriber for HttpTranscriber {
    fn transcribe(&self, audio_path: &str) -> Result<Transcript, TranscriptionError> {
        if !Path::new(audio_path).exists() {
            return Err(TranscriptionError::AudioNotFound(audio_path.to_string()));
        }

        let url = format!("{}/v1/transcriptions", self.base_url);
        let body = TranscriptionRequest {
            audio_path,
            language: "en",
        };

        let response = self.client.post(&url).json(&body).send().map_err(|e| {
            if e.is_connect() {
                TranscriptionError::Connection(self.base_url.clone())
            } else if e.is_timeout() {
                TranscriptionError::Timeout(self.timeout_secs)
            } else {
                TranscriptionError::MalformedResponse(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(TranscriptionError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TranscriptionResponse = response
            .json()
            .map_err(|e| TranscriptionError::MalformedResponse(e.to_string()))?;

        // The consultation id is stamped on by the pipeline before storing.
        Ok(Transcript::new(
            audio_stem(audio_path),
            parsed.text.trim().to_string(),
            parsed.duration_s,
        ))
    }
}

// ---------------------------------------------------------------------------
// Fixture-backed transcriber
// ---------------------------------------------------------------------------

/// Approximate dictation pace used to derive fixture durations.
const DICTATION_WORDS_PER_SECOND: f64 = 2.5;

const FALLBACK_TRANSCRIPT: &str = "Mock transcript placeholder for non-demo audio input.";

const MRS_THOMPSON_TRANSCRIPT: &str = "This is Mrs Margaret Thompson, seen in the diabetes annual \
review clinic today. She tells me she has been feeling increasingly fatigued over the past three \
months, with reduced exercise tolerance, and she is struggling to walk to the shops without \
stopping. She denies chest pain, palpitations or syncope, and reports no hypoglycaemic episodes. \
She takes metformin one gram twice daily and gliclazide eighty milligrams twice daily, although \
she admits she occasionally misses the evening doses. On examination she looked well. Blood \
pressure was one hundred and thirty-two over seventy-eight. Heart sounds were normal, the chest \
was clear, and foot pulses were present with intact sensation. Her recent bloods show an HbA1c \
of fifty-five, up from forty-eight last year, and her eGFR is fifty-two. I note her penicillin \
allergy with previous anaphylaxis. My impression is suboptimal glycaemic control on current \
therapy with early renal impairment. The plan is to reinforce lifestyle measures, review her \
adherence, repeat the renal profile and HbA1c in three months, and consider escalating treatment \
if things have not improved. I will copy this letter to her GP.";

const MR_OKAFOR_TRANSCRIPT: &str = "Mr Daniel Okafor attends for review of his blood pressure. \
He reports headaches on waking over the last month but no chest pain or breathlessness. Home \
readings average one hundred and fifty-eight over ninety-four despite amlodipine five milligrams \
daily. He admits his salt intake is high and he has not managed to restart regular exercise \
since injuring his knee. Examination today showed a blood pressure of one hundred and sixty-two \
over ninety-six, a regular pulse, no murmurs and no peripheral oedema. Fundoscopy was \
unremarkable. Renal function and electrolytes from last week are within normal limits. The \
impression is uncontrolled hypertension on monotherapy. I have increased amlodipine to ten \
milligrams daily, requested an echocardiogram, and asked him to keep a home blood pressure \
diary. We will review in six weeks and add a second agent if control remains poor.";

const MS_PATEL_TRANSCRIPT: &str = "Ms Anika Patel was reviewed in the respiratory clinic \
following her recent emergency department attendance with an asthma exacerbation. She has \
needed her salbutamol inhaler most days this fortnight and wakes with cough around twice a \
week. She reports good adherence to beclometasone but her inhaler technique was poor when \
checked today. Peak flow in clinic was three hundred and eighty, about eighty per cent of her \
best. The chest was clear on auscultation with no wheeze at rest. I have stepped her up to a \
combination inhaler, corrected her technique, and issued a written asthma action plan. She \
will repeat peak flow monitoring at home and we will review her in eight weeks, sooner if her \
reliever use increases.";

/// Deterministic transcriber for demo clinics and offline tests.
///
/// Known demo recordings are matched by file stem substring; anything else
/// gets a fixed placeholder so the pipeline still runs end to end.
pub struct FixtureTranscriber;

impl FixtureTranscriber {
    fn demo_text(stem: &str) -> &'static str {
        let fixtures = [
            ("mrs_thompson", MRS_THOMPSON_TRANSCRIPT),
            ("mr_okafor", MR_OKAFOR_TRANSCRIPT),
            ("ms_patel", MS_PATEL_TRANSCRIPT),
        ];
        for (key, text) in fixtures {
            if stem.contains(key) {
                return text;
            }
        }
        FALLBACK_TRANSCRIPT
    }
}

impl Transcriber for FixtureTranscriber {
    fn transcribe(&self, audio_path: &str) -> Result<Transcript, TranscriptionError> {
        let stem = audio_stem(audio_path);
        let text = Self::demo_text(stem);
        let duration_s = text.split_whitespace().count() as f64 / DICTATION_WORDS_PER_SECOND;
        Ok(Transcript::new(stem, text.to_string(), duration_s))
    }
}

fn audio_stem(audio_path: &str) -> &str {
    Path::new(audio_path)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(audio_path)
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
