use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::enums::LabTrend;

/// Active medication extracted from a MedicationRequest resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Medication {
    pub name: String,
    pub dose: String,
    pub frequency: String,
    pub fhir_id: String,
}

/// Allergy record extracted from an AllergyIntolerance resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allergy {
    pub substance: String,
    pub reaction: String,
    /// Criticality from the source record, `"unknown"` when absent.
    pub severity: String,
}

/// Laboratory result with previous-value linkage for trend display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabResult {
    pub name: String,
    pub value: String,
    pub unit: String,
    pub reference_range: Option<String>,
    pub date: String,
    pub trend: Option<LabTrend>,
    pub previous_value: Option<String>,
    pub previous_date: Option<String>,
    pub fhir_resource_id: String,
}

/// Condensed imaging/diagnostic report entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagingReport {
    #[serde(rename = "type")]
    pub kind: String,
    pub date: String,
    pub summary: String,
}

/// Structured patient record assembled ahead of letter generation.
///
/// `demographics` is a flat key/value map (`name`, `dob`, `nhs_number`,
/// `age`, `sex`, `address`) kept as a BTreeMap so serialization order is
/// stable. `retrieval_warnings` is append-only: every degradation on the
/// way to a letter leaves a human-readable trace here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientContext {
    pub patient_id: String,
    pub demographics: BTreeMap<String, Value>,
    pub problem_list: Vec<String>,
    pub medications: Vec<Medication>,
    pub allergies: Vec<Allergy>,
    pub recent_labs: Vec<LabResult>,
    pub recent_imaging: Vec<ImagingReport>,
    pub clinical_flags: Vec<String>,
    pub last_letter_excerpt: Option<String>,
    pub retrieval_warnings: Vec<String>,
    pub retrieved_at: DateTime<Utc>,
}

impl PatientContext {
    /// Empty context shell for a patient id, timestamped now.
    pub fn empty(patient_id: &str) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            demographics: BTreeMap::new(),
            problem_list: Vec::new(),
            medications: Vec::new(),
            allergies: Vec::new(),
            recent_labs: Vec::new(),
            recent_imaging: Vec::new(),
            clinical_flags: Vec::new(),
            last_letter_excerpt: None,
            retrieval_warnings: Vec::new(),
            retrieved_at: Utc::now(),
        }
    }

    /// Names of current medications, used for the letter's medication list.
    pub fn medication_names(&self) -> Vec<String> {
        self.medications
            .iter()
            .filter(|m| !m.name.is_empty())
            .map(|m| m.name.clone())
            .collect()
    }

    /// String value from the demographics map, empty when absent.
    pub fn demographic(&self, key: &str) -> String {
        match self.demographics.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_context_has_no_lists() {
        let ctx = PatientContext::empty("pt-001");
        assert_eq!(ctx.patient_id, "pt-001");
        assert!(ctx.problem_list.is_empty());
        assert!(ctx.retrieval_warnings.is_empty());
        assert!(ctx.last_letter_excerpt.is_none());
    }

    #[test]
    fn medication_names_skip_blank_entries() {
        let mut ctx = PatientContext::empty("pt-001");
        ctx.medications = vec![
            Medication {
                name: "Metformin".into(),
                dose: "1g".into(),
                frequency: "BD".into(),
                fhir_id: "med-1".into(),
            },
            Medication {
                name: String::new(),
                dose: String::new(),
                frequency: String::new(),
                fhir_id: "med-2".into(),
            },
        ];
        assert_eq!(ctx.medication_names(), vec!["Metformin".to_string()]);
    }

    #[test]
    fn demographic_lookup_handles_non_string_values() {
        let mut ctx = PatientContext::empty("pt-001");
        ctx.demographics
            .insert("name".into(), Value::String("Mrs Thompson".into()));
        ctx.demographics.insert("age".into(), Value::from(74));
        ctx.demographics.insert("address".into(), Value::Null);
        assert_eq!(ctx.demographic("name"), "Mrs Thompson");
        assert_eq!(ctx.demographic("age"), "74");
        assert_eq!(ctx.demographic("address"), "");
        assert_eq!(ctx.demographic("missing"), "");
    }

    #[test]
    fn imaging_report_uses_type_wire_key() {
        let report = ImagingReport {
            kind: "CT chest".into(),
            date: "2026-01-10".into(),
            summary: "No acute findings.".into(),
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value.get("type").unwrap(), "CT chest");
        assert!(value.get("kind").is_none());
    }
}
