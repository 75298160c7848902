use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::context::PatientContext;
use super::document::ClinicalDocument;
use super::enums::{ConsultationStatus, PipelineStage};
use super::patient::Patient;
use super::transcript::Transcript;

/// One consultation's full lifecycle state.
///
/// Created at recording start and mutated in place by the pipeline through
/// every stage. Exactly one live value per id; the orchestrator is the sole
/// writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consultation {
    pub id: String,
    pub patient: Patient,
    pub status: ConsultationStatus,
    pub pipeline_stage: Option<PipelineStage>,
    pub context: Option<PatientContext>,
    pub transcript: Option<Transcript>,
    pub document: Option<ClinicalDocument>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub audio_path: Option<String>,
}

impl Consultation {
    /// Fresh consultation in recording state for a selected patient.
    pub fn new(id: String, patient: Patient) -> Self {
        Self {
            id,
            patient,
            status: ConsultationStatus::Recording,
            pipeline_stage: None,
            context: None,
            transcript: None,
            document: None,
            started_at: Some(Utc::now()),
            ended_at: None,
            audio_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_patient() -> Patient {
        Patient {
            id: "pt-001".into(),
            nhs_number: "943-476-5829".into(),
            name: "Mrs Margaret Thompson".into(),
            date_of_birth: "14/03/1959".into(),
            age: 67,
            sex: "Female".into(),
            appointment_time: "09:30".into(),
            summary: "T2DM annual review".into(),
        }
    }

    #[test]
    fn new_consultation_starts_recording() {
        let c = Consultation::new("cons-1".into(), sample_patient());
        assert_eq!(c.status, ConsultationStatus::Recording);
        assert!(c.started_at.is_some());
        assert!(c.ended_at.is_none());
        assert!(c.pipeline_stage.is_none());
        assert!(c.audio_path.is_none());
    }

    #[test]
    fn consultation_serializes_optional_fields_as_null() {
        let c = Consultation::new("cons-1".into(), sample_patient());
        let value = serde_json::to_value(&c).unwrap();
        assert!(value.get("transcript").unwrap().is_null());
        assert!(value.get("audioPath").unwrap().is_null());
        assert_eq!(value.get("status").unwrap(), "recording");
    }
}
