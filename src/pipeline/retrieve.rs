use chrono::Utc;
use serde_json::{json, Value};

use crate::fhir::{context_from_bundle, FhirClient, FhirError, RawPatientBundle};
use crate::models::{Allergy, ImagingReport, LabResult, LabTrend, Medication, Patient, PatientContext};

/// Errors from the patient-context collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Patient not found: {0}")]
    PatientNotFound(String),

    #[error("FHIR retrieval failed: {0}")]
    Fhir(#[from] FhirError),
}

/// Patient-record retrieval capability. No partial results: a failure
/// means the caller degrades to [`fallback_context`].
pub trait ContextSource {
    fn fetch_patient_context(&self, patient_id: &str) -> Result<PatientContext, ContextError>;
}

/// Minimal context built from the appointment record when retrieval fails.
///
/// Keeps the pipeline moving with demographics alone and discloses the
/// degradation through a retrieval warning.
pub fn fallback_context(patient: &Patient) -> PatientContext {
    let mut context = PatientContext::empty(&patient.id);
    context
        .demographics
        .insert("name".to_string(), json!(patient.name));
    context
        .demographics
        .insert("dob".to_string(), json!(patient.date_of_birth));
    context
        .demographics
        .insert("nhs_number".to_string(), json!(patient.nhs_number));
    context
        .demographics
        .insert("age".to_string(), json!(patient.age));
    context
        .demographics
        .insert("sex".to_string(), json!(patient.sex));
    context.retrieval_warnings.push(
        "Patient context retrieval failed; continuing with demographics from the appointment record only."
            .to_string(),
    );
    context
}

// ---------------------------------------------------------------------------
// FHIR-backed context source
// ---------------------------------------------------------------------------

/// Context source that aggregates live FHIR queries into a summary.
pub struct FhirContextSource {
    client: FhirClient,
}

impl FhirContextSource {
    pub fn new(client: FhirClient) -> Self {
        Self { client }
    }
}

impl ContextSource for FhirContextSource {
    fn fetch_patient_context(&self, patient_id: &str) -> Result<PatientContext, ContextError> {
        let bundle = RawPatientBundle::fetch(&self.client, patient_id)?;
        if bundle.patient().is_none() {
            return Err(ContextError::PatientNotFound(patient_id.to_string()));
        }
        Ok(context_from_bundle(&bundle))
    }
}

// ---------------------------------------------------------------------------
// Fixture-backed context source
// ---------------------------------------------------------------------------

/// Deterministic context source covering the demo clinic list.
pub struct FixtureContextSource;

impl ContextSource for FixtureContextSource {
    fn fetch_patient_context(&self, patient_id: &str) -> Result<PatientContext, ContextError> {
        match patient_id {
            "pt-001" => Ok(thompson_context()),
            "pt-002" => Ok(okafor_context()),
            "pt-003" => Ok(patel_context()),
            other => Err(ContextError::PatientNotFound(other.to_string())),
        }
    }
}

fn demographics(
    name: &str,
    dob: &str,
    age: u32,
    nhs_number: &str,
    sex: &str,
) -> std::collections::BTreeMap<String, Value> {
    let mut map = std::collections::BTreeMap::new();
    map.insert("address".to_string(), json!(""));
    map.insert("age".to_string(), json!(age));
    map.insert("dob".to_string(), json!(dob));
    map.insert("name".to_string(), json!(name));
    map.insert("nhs_number".to_string(), json!(nhs_number));
    map.insert("sex".to_string(), json!(sex));
    map
}

fn thompson_context() -> PatientContext {
    PatientContext {
        patient_id: "pt-001".to_string(),
        demographics: demographics("Mrs Margaret Thompson", "14/03/1959", 67, "943-476-5829", "Female"),
        problem_list: vec![
            "Type 2 diabetes mellitus".to_string(),
            "Chronic kidney disease".to_string(),
        ],
        medications: vec![
            Medication {
                name: "Metformin".to_string(),
                dose: "1 g".to_string(),
                frequency: "BD".to_string(),
                fhir_id: "med-1".to_string(),
            },
            Medication {
                name: "Gliclazide".to_string(),
                dose: "80 mg".to_string(),
                frequency: "BD".to_string(),
                fhir_id: "med-2".to_string(),
            },
        ],
        allergies: vec![Allergy {
            substance: "Penicillin".to_string(),
            reaction: "Anaphylaxis".to_string(),
            severity: "severe".to_string(),
        }],
        recent_labs: vec![
            LabResult {
                name: "HbA1c".to_string(),
                value: "55".to_string(),
                unit: "mmol/mol".to_string(),
                reference_range: Some("20 - 41".to_string()),
                date: "2026-01-05".to_string(),
                trend: Some(LabTrend::Rising),
                previous_value: Some("48".to_string()),
                previous_date: Some("2025-07-02".to_string()),
                fhir_resource_id: "obs-1".to_string(),
            },
            LabResult {
                name: "eGFR".to_string(),
                value: "52".to_string(),
                unit: "mL/min/1.73m2".to_string(),
                reference_range: Some("> 90".to_string()),
                date: "2026-01-05".to_string(),
                trend: Some(LabTrend::Falling),
                previous_value: Some("58".to_string()),
                previous_date: Some("2025-07-02".to_string()),
                fhir_resource_id: "obs-2".to_string(),
            },
        ],
        recent_imaging: vec![ImagingReport {
            kind: "Chest X-ray".to_string(),
            date: "2025-11-20".to_string(),
            summary: "Clear lung fields. No acute abnormality.".to_string(),
        }],
        clinical_flags: vec!["HbA1c rising trend (48 → 55)".to_string()],
        last_letter_excerpt: Some(
            "Seen in diabetes clinic; HbA1c 48, continue current therapy and recheck in six months."
                .to_string(),
        ),
        retrieval_warnings: Vec::new(),
        retrieved_at: Utc::now(),
    }
}

fn okafor_context() -> PatientContext {
    PatientContext {
        patient_id: "pt-002".to_string(),
        demographics: demographics("Mr Daniel Okafor", "22/07/1965", 61, "943-476-5830", "Male"),
        problem_list: vec!["Essential hypertension".to_string()],
        medications: vec![Medication {
            name: "Amlodipine".to_string(),
            dose: "5 mg".to_string(),
            frequency: "OD".to_string(),
            fhir_id: "med-3".to_string(),
        }],
        allergies: Vec::new(),
        recent_labs: vec![LabResult {
            name: "Creatinine".to_string(),
            value: "88".to_string(),
            unit: "umol/L".to_string(),
            reference_range: Some("59 - 104".to_string()),
            date: "2026-02-10".to_string(),
            trend: Some(LabTrend::Stable),
            previous_value: Some("86".to_string()),
            previous_date: Some("2025-08-15".to_string()),
            fhir_resource_id: "obs-7".to_string(),
        }],
        recent_imaging: Vec::new(),
        clinical_flags: Vec::new(),
        last_letter_excerpt: None,
        retrieval_warnings: Vec::new(),
        retrieved_at: Utc::now(),
    }
}

fn patel_context() -> PatientContext {
    PatientContext {
        patient_id: "pt-003".to_string(),
        demographics: demographics("Ms Anika Patel", "08/11/1990", 35, "943-476-5831", "Female"),
        problem_list: vec!["Asthma".to_string()],
        medications: vec![
            Medication {
                name: "Salbutamol".to_string(),
                dose: "100 mcg".to_string(),
                frequency: "PRN".to_string(),
                fhir_id: "med-4".to_string(),
            },
            Medication {
                name: "Beclometasone".to_string(),
                dose: "200 mcg".to_string(),
                frequency: "BD".to_string(),
                fhir_id: "med-5".to_string(),
            },
        ],
        allergies: vec![Allergy {
            substance: "Aspirin".to_string(),
            reaction: "Wheeze".to_string(),
            severity: "moderate".to_string(),
        }],
        recent_labs: vec![LabResult {
            name: "Eosinophils".to_string(),
            value: "0.6".to_string(),
            unit: "10^9/L".to_string(),
            reference_range: Some("0.0 - 0.4".to_string()),
            date: "2026-03-01".to_string(),
            trend: None,
            previous_value: None,
            previous_date: None,
            fhir_resource_id: "obs-9".to_string(),
        }],
        recent_imaging: vec![ImagingReport {
            kind: "Chest X-ray".to_string(),
            date: "2026-02-28".to_string(),
            summary: "No consolidation or pneumothorax.".to_string(),
        }],
        clinical_flags: Vec::new(),
        last_letter_excerpt: None,
        retrieval_warnings: Vec::new(),
        retrieved_at: Utc::now(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
