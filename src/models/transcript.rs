use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speech-to-text output for one consultation recording.
///
/// Produced once by the transcription collaborator; the orchestrator stamps
/// `consultation_id` on before storing it, everything else is immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub consultation_id: String,
    pub text: String,
    pub duration_s: f64,
    pub word_count: usize,
    pub created_at: DateTime<Utc>,
}

impl Transcript {
    /// Build a transcript from raw model output, deriving the word count.
    pub fn new(consultation_id: &str, text: String, duration_s: f64) -> Self {
        let word_count = text.split_whitespace().count();
        Self {
            consultation_id: consultation_id.to_string(),
            text,
            duration_s,
            word_count,
            created_at: Utc::now(),
        }
    }

    /// True when the recognizer produced nothing usable.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}
