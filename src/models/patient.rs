use serde::{Deserialize, Serialize};

/// Patient summary attached to a consultation at start time.
///
/// Carries the appointment-list view of a patient; the full record lives
/// behind the FHIR boundary and is fetched as `PatientContext`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: String,
    pub nhs_number: String,
    pub name: String,
    pub date_of_birth: String,
    pub age: u32,
    pub sex: String,
    pub appointment_time: String,
    pub summary: String,
}
