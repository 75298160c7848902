use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::ConsultationStatus;

/// One headed section of a clinical letter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSection {
    pub heading: String,
    pub content: String,
    pub editable: bool,
    pub fhir_sources: Vec<String>,
}

impl DocumentSection {
    /// Editable section with no FHIR provenance attached.
    pub fn new(heading: &str, content: &str) -> Self {
        Self {
            heading: heading.to_string(),
            content: content.to_string(),
            editable: true,
            fhir_sources: Vec::new(),
        }
    }
}

/// Generated clinic letter under review or signed off.
///
/// `status` mirrors the review/signed_off subset of the consultation
/// status. The section list is always at least four entries long once the
/// orchestrator has built the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalDocument {
    pub consultation_id: String,
    pub letter_date: String,
    pub patient_name: String,
    pub patient_dob: String,
    pub nhs_number: String,
    pub addressee: String,
    pub salutation: String,
    pub sections: Vec<DocumentSection>,
    pub medications_list: Vec<String>,
    pub sign_off: String,
    pub status: ConsultationStatus,
    pub generated_at: DateTime<Utc>,
    pub generation_time_s: f64,
    pub discrepancies: Vec<String>,
}

impl ClinicalDocument {
    /// Index of a section by case-insensitive heading match.
    pub fn section_index(&self, heading: &str) -> Option<usize> {
        self.sections
            .iter()
            .position(|s| s.heading.eq_ignore_ascii_case(heading))
    }
}
