use serde_json::Value;

use super::client::FhirClient;
use super::FhirError;

/// Resources extracted from a FHIR search Bundle's `entry` array.
pub fn bundle_entries(bundle: &Value) -> Vec<Value> {
    bundle
        .get("entry")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.get("resource"))
                .filter(|resource| !resource.is_null())
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

/// Raw patient-scoped resources aggregated across the seven query
/// patterns. This is the unsummarized input to context extraction.
#[derive(Debug, Clone, Default)]
pub struct RawPatientBundle {
    pub patient_id: String,
    pub patients: Vec<Value>,
    pub conditions: Vec<Value>,
    pub medications: Vec<Value>,
    pub observations: Vec<Value>,
    pub allergies: Vec<Value>,
    pub diagnostic_reports: Vec<Value>,
    pub encounters: Vec<Value>,
}

impl RawPatientBundle {
    /// Run all seven queries for a patient.
    ///
    /// When the patient search returns nothing, falls back to a direct
    /// `/Patient/{id}` read so demographics survive search quirks.
    pub fn fetch(client: &FhirClient, patient_id: &str) -> Result<Self, FhirError> {
        let mut patients = bundle_entries(&client.search_patients(patient_id)?);
        let conditions = bundle_entries(&client.conditions(patient_id)?);
        let medications = bundle_entries(&client.medications(patient_id)?);
        let observations = bundle_entries(&client.observations(patient_id)?);
        let allergies = bundle_entries(&client.allergies(patient_id)?);
        let diagnostic_reports = bundle_entries(&client.diagnostic_reports(patient_id)?);
        let encounters = bundle_entries(&client.recent_encounters(patient_id)?);

        if patients.is_empty() {
            let resource = client.patient(patient_id)?;
            if resource.as_object().is_some_and(|o| !o.is_empty()) {
                patients = vec![resource];
            }
        }

        Ok(Self {
            patient_id: patient_id.to_string(),
            patients,
            conditions,
            medications,
            observations,
            allergies,
            diagnostic_reports,
            encounters,
        })
    }

    /// First patient resource, when any was found.
    pub fn patient(&self) -> Option<&Value> {
        self.patients.first()
    }
}
