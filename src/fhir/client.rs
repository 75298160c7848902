use serde_json::{Map, Value};

use super::FhirError;

/// Blocking FHIR REST client covering the query patterns the pipeline
/// needs. 404 responses are treated as empty results and a single retry is
/// made when the server answers 5xx.
pub struct FhirClient {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl FhirClient {
    /// Create a client for a FHIR base URL (including the `/fhir` path).
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

    /// GET a FHIR path with query parameters.
    ///
    /// 404 → empty object; one retry on 5xx before surfacing the status;
    /// other non-success statuses surface immediately.
    fn request_json(&self, path: &str, params: &[(&str, &str)]) -> Result<Value, FhirError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempts = 0;
        loop {
            attempts += 1;
            let response = self
                .client
                .get(&url)
                .query(params)
                .send()
                .map_err(|e| {
                    if e.is_connect() {
                        FhirError::Connection(self.base_url.clone())
                    } else if e.is_timeout() {
                        FhirError::Timeout(self.timeout_secs)
                    } else {
                        FhirError::HttpClient(e.to_string())
                    }
                })?;

            let status = response.status();
            if status.as_u16() == 404 {
                return Ok(Value::Object(Map::new()));
            }

            if status.is_server_error() && attempts < 2 {
                tracing::warn!(url = %url, status = status.as_u16(), "FHIR server 5xx, retrying once");
                continue;
            }

            if !status.is_success() {
                let body = response.text().unwrap_or_default();
                return Err(FhirError::Server {
                    status: status.as_u16(),
                    body,
                });
            }

            return response
                .json()
                .map_err(|e| FhirError::MalformedResponse(e.to_string()));
        }
    }

    /// Fetch a Patient resource by id.
    pub fn patient(&self, patient_id: &str) -> Result<Value, FhirError> {
        self.request_json(&format!("/Patient/{patient_id}"), &[])
    }

    /// Search patients by name or identifier fragment.
    pub fn search_patients(&self, name: &str) -> Result<Value, FhirError> {
        self.request_json("/Patient", &[("name", name), ("_count", "10")])
    }

    /// Active Condition resources for a patient.
    pub fn conditions(&self, patient_id: &str) -> Result<Value, FhirError> {
        self.request_json(
            "/Condition",
            &[("patient", patient_id), ("clinical-status", "active")],
        )
    }

    /// Active MedicationRequest resources for a patient.
    pub fn medications(&self, patient_id: &str) -> Result<Value, FhirError> {
        self.request_json(
            "/MedicationRequest",
            &[("patient", patient_id), ("status", "active")],
        )
    }

    /// Recent laboratory Observation resources, newest first.
    pub fn observations(&self, patient_id: &str) -> Result<Value, FhirError> {
        self.request_json(
            "/Observation",
            &[
                ("patient", patient_id),
                ("category", "laboratory"),
                ("_sort", "-date"),
                ("_count", "20"),
            ],
        )
    }

    /// AllergyIntolerance resources for a patient.
    pub fn allergies(&self, patient_id: &str) -> Result<Value, FhirError> {
        self.request_json("/AllergyIntolerance", &[("patient", patient_id)])
    }

    /// Recent DiagnosticReport resources, newest first.
    pub fn diagnostic_reports(&self, patient_id: &str) -> Result<Value, FhirError> {
        self.request_json(
            "/DiagnosticReport",
            &[("patient", patient_id), ("_sort", "-date"), ("_count", "5")],
        )
    }

    /// Most recent Encounter resources for a patient.
    pub fn recent_encounters(&self, patient_id: &str) -> Result<Value, FhirError> {
        self.request_json(
            "/Encounter",
            &[("patient", patient_id), ("_sort", "-date"), ("_count", "3")],
        )
    }
}
