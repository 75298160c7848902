//! Deterministic extraction from raw FHIR resources to `PatientContext`.
//!
//! No model in the loop: the same bundle always produces the same context
//! (modulo the `retrieved_at` stamp), which is what makes the retrieval
//! stage safe to rerun and easy to test.

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, NaiveDate, Utc};
use serde_json::Value;

use crate::models::{Allergy, ImagingReport, LabResult, LabTrend, Medication, PatientContext};

use super::bundle::RawPatientBundle;

/// Build a full context from an aggregated patient bundle.
pub fn context_from_bundle(bundle: &RawPatientBundle) -> PatientContext {
    let mut context = PatientContext::empty(&bundle.patient_id);
    context.demographics = extract_demographics(bundle.patient().unwrap_or(&Value::Null));
    context.problem_list = extract_problem_list(&bundle.conditions);
    context.medications = extract_medications(&bundle.medications);
    context.allergies = extract_allergies(&bundle.allergies);
    context.recent_labs = extract_labs(&bundle.observations);
    context.recent_imaging = extract_imaging(&bundle.diagnostic_reports);
    context.clinical_flags = derive_clinical_flags(&context.recent_labs);
    context
}

/// Flatten a FHIR Patient resource into the demographics map.
pub fn extract_demographics(patient: &Value) -> BTreeMap<String, Value> {
    let name_entry = &patient["name"][0];
    let mut name_parts = str_items(&name_entry["prefix"]);
    name_parts.extend(str_items(&name_entry["given"]));
    if let Some(family) = name_entry["family"].as_str() {
        name_parts.push(family.to_string());
    }
    let full_name = name_parts
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string();

    let mut nhs_number = String::new();
    for identifier in patient["identifier"].as_array().into_iter().flatten() {
        let value = identifier["value"].as_str().unwrap_or("");
        if !value.is_empty() {
            nhs_number = value.to_string();
            break;
        }
    }
    let digits: String = nhs_number.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 10 {
        nhs_number = format!("{}-{}-{}", &digits[..3], &digits[3..6], &digits[6..]);
    }

    let birth_date_raw = patient["birthDate"].as_str().unwrap_or("");
    let mut dob_display = birth_date_raw.to_string();
    let mut age: Option<i32> = None;
    if let Ok(dob) = NaiveDate::parse_from_str(birth_date_raw, "%Y-%m-%d") {
        dob_display = dob.format("%d/%m/%Y").to_string();
        age = Some(age_on(dob, Utc::now().date_naive()));
    }

    let mut demographics = BTreeMap::new();
    demographics.insert("name".to_string(), Value::from(full_name));
    demographics.insert("dob".to_string(), Value::from(dob_display));
    demographics.insert("nhs_number".to_string(), Value::from(nhs_number));
    demographics.insert(
        "age".to_string(),
        age.map(Value::from).unwrap_or(Value::Null),
    );
    demographics.insert(
        "sex".to_string(),
        Value::from(capitalize(patient["gender"].as_str().unwrap_or(""))),
    );
    demographics.insert("address".to_string(), Value::from(""));
    demographics
}

/// Whole years between a date of birth and a reference date.
pub fn age_on(dob: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - dob.year();
    if (today.month(), today.day()) < (dob.month(), dob.day()) {
        age -= 1;
    }
    age
}

/// Active problems from Condition resources. Conditions without any
/// clinical-status coding count as active.
pub fn extract_problem_list(conditions: &[Value]) -> Vec<String> {
    let mut problems = Vec::new();
    for condition in conditions {
        let is_active = match condition["clinicalStatus"]["coding"].as_array() {
            Some(codes) if !codes.is_empty() => codes.iter().any(|c| c["code"] == "active"),
            _ => true,
        };
        let label = text_of(&condition["code"]);
        if is_active && !label.is_empty() {
            problems.push(label);
        }
    }
    problems
}

/// Medication entries from MedicationRequest resources. The dosage text's
/// last word becomes the frequency, the rest the dose.
pub fn extract_medications(medications: &[Value]) -> Vec<Medication> {
    medications
        .iter()
        .map(|medication| {
            let dosage_text = medication["dosageInstruction"][0]["text"]
                .as_str()
                .unwrap_or("")
                .trim();
            let (dose, frequency) = match dosage_text.rsplit_once(' ') {
                Some((dose, frequency)) => (dose.to_string(), frequency.to_string()),
                None => (dosage_text.to_string(), String::new()),
            };
            Medication {
                name: text_of(&medication["medicationCodeableConcept"]),
                dose,
                frequency,
                fhir_id: medication["id"].as_str().unwrap_or("").to_string(),
            }
        })
        .collect()
}

/// Allergy summaries from AllergyIntolerance resources.
pub fn extract_allergies(allergies: &[Value]) -> Vec<Allergy> {
    allergies
        .iter()
        .map(|allergy| {
            let reaction = allergy["reaction"][0]["manifestation"][0]["text"]
                .as_str()
                .unwrap_or("")
                .to_string();
            let severity = allergy["criticality"].as_str().unwrap_or("").trim();
            Allergy {
                substance: text_of(&allergy["code"]),
                reaction,
                severity: if severity.is_empty() {
                    "unknown".to_string()
                } else {
                    severity.to_string()
                },
            }
        })
        .collect()
}

/// Laboratory results from Observation resources, newest first, each
/// linked to the previous result of the same analyte for trend display.
pub fn extract_labs(observations: &[Value]) -> Vec<LabResult> {
    let mut ordered: Vec<&Value> = observations.iter().collect();
    ordered.sort_by_key(|obs| obs["effectiveDateTime"].as_str().unwrap_or("").to_string());

    let mut previous_by_name: HashMap<String, (String, String)> = HashMap::new();
    let mut labs = Vec::new();
    for observation in ordered {
        let quantity = &observation["valueQuantity"];
        let name = text_of(&observation["code"]);
        let value = scalar_string(&quantity["value"]);
        let date = observation["effectiveDateTime"]
            .as_str()
            .unwrap_or("")
            .to_string();

        let mut lab = LabResult {
            name: name.clone(),
            value,
            unit: quantity["unit"].as_str().unwrap_or("").to_string(),
            reference_range: None,
            date: date.clone(),
            trend: None,
            previous_value: None,
            previous_date: None,
            fhir_resource_id: observation["id"].as_str().unwrap_or("").to_string(),
        };

        if let Some((previous_value, previous_date)) = previous_by_name.get(&name) {
            lab.previous_value = Some(previous_value.clone());
            lab.previous_date = Some(previous_date.clone());
            lab.trend = match (lab.value.parse::<f64>(), previous_value.parse::<f64>()) {
                (Ok(current), Ok(previous)) if current > previous => Some(LabTrend::Rising),
                (Ok(current), Ok(previous)) if current < previous => Some(LabTrend::Falling),
                (Ok(_), Ok(_)) => Some(LabTrend::Stable),
                _ => None,
            };
        }
        previous_by_name.insert(name, (lab.value.clone(), date));
        labs.push(lab);
    }

    labs.reverse();
    labs
}

/// Condensed imaging summaries from DiagnosticReport resources.
pub fn extract_imaging(reports: &[Value]) -> Vec<ImagingReport> {
    reports
        .iter()
        .map(|report| ImagingReport {
            kind: match report["code"].get("text") {
                Some(text) => text.as_str().unwrap_or("").to_string(),
                None => "Diagnostic report".to_string(),
            },
            date: report["effectiveDateTime"].as_str().unwrap_or("").to_string(),
            summary: report["conclusion"].as_str().unwrap_or("").trim().to_string(),
        })
        .collect()
}

/// Flags worth surfacing in the letter, derived from lab trends.
pub fn derive_clinical_flags(labs: &[LabResult]) -> Vec<String> {
    let mut flags = Vec::new();
    let hba1c: Vec<&LabResult> = labs
        .iter()
        .filter(|lab| lab.name.eq_ignore_ascii_case("hba1c"))
        .collect();
    if hba1c.len() >= 2 {
        if let (Ok(latest), Ok(previous)) =
            (hba1c[0].value.parse::<f64>(), hba1c[1].value.parse::<f64>())
        {
            if latest > previous {
                flags.push(format!(
                    "HbA1c rising trend ({} → {})",
                    hba1c[1].value, hba1c[0].value
                ));
            }
        }
    }
    flags
}

fn text_of(value: &Value) -> String {
    value["text"].as_str().unwrap_or("").trim().to_string()
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

fn str_items(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
