// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! FHIR-shaped projections over raw bundle JSON.
//!
//! Bundles arrive as untyped `serde_json::Value`; these functions pull out
//! the handful of typed views the tools, batch primitives and sandbox work
//! with.  Missing fields degrade to empty strings/`None`; corpus data is
//! synthetic and uneven, and a half-filled record is still useful to the
//! model.

use chrono::{Datelike, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Condition {
    pub name: String,
    pub code: String,
    pub system: String,
    pub clinical_status: String,
    pub verification_status: String,
    pub category: Vec<String>,
    pub onset_date: String,
    pub abatement_date: String,
    pub recorded_date: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Observation {
    pub code: String,
    pub value: Option<ObservationValue>,
    pub unit: Option<String>,
    pub effective_date: String,
    pub status: String,
    pub category: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_range: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ObservationValue {
    Number(f64),
    Text(String),
}

impl ObservationValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ObservationValue::Number(n) => Some(*n),
            ObservationValue::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Medication {
    pub medication: String,
    pub status: String,
    pub authored_on: String,
    pub dosage_instruction: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Demographics {
    pub patient_id: String,
    pub name: String,
    pub given_name: String,
    pub family_name: String,
    pub gender: String,
    pub birth_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
}

/// All resources of one type from a bundle, as raw JSON.
pub fn resources_of_type(bundle: &Value, resource_type: &str) -> Vec<Value> {
    bundle["entry"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .map(|e| &e["resource"])
                .filter(|r| r["resourceType"].as_str() == Some(resource_type))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

pub fn conditions(bundle: &Value) -> Vec<Condition> {
    resources_of_type(bundle, "Condition")
        .iter()
        .map(|resource| {
            let code_obj = &resource["code"];
            let mut name = text_of(code_obj);
            let (code, system) = first_coding(code_obj);
            if name.is_empty() {
                name = first_coding_display(code_obj);
            }
            Condition {
                name,
                code,
                system,
                clinical_status: first_coding(&resource["clinicalStatus"]).0,
                verification_status: first_coding(&resource["verificationStatus"]).0,
                category: category_codes(resource),
                onset_date: resource["onsetDateTime"]
                    .as_str()
                    .or_else(|| resource["onsetPeriod"]["start"].as_str())
                    .unwrap_or_default()
                    .to_string(),
                abatement_date: str_field(resource, "abatementDateTime"),
                recorded_date: str_field(resource, "recordedDate"),
            }
        })
        .collect()
}

pub fn observations(bundle: &Value) -> Vec<Observation> {
    resources_of_type(bundle, "Observation")
        .iter()
        .map(|resource| {
            let (value, unit) = observation_value(resource);
            Observation {
                code: non_empty_or(text_of(&resource["code"]), "Unknown"),
                value,
                unit,
                effective_date: str_field(resource, "effectiveDateTime"),
                status: str_field(resource, "status"),
                category: category_codes(resource),
                reference_range: reference_range(resource),
            }
        })
        .collect()
}

pub fn medications(bundle: &Value) -> Vec<Medication> {
    resources_of_type(bundle, "MedicationRequest")
        .iter()
        .map(|resource| Medication {
            medication: non_empty_or(text_of(&resource["medicationCodeableConcept"]), "Unknown"),
            status: str_field(resource, "status"),
            authored_on: str_field(resource, "authoredOn"),
            dosage_instruction: resource["dosageInstruction"][0]["text"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
        })
        .collect()
}

pub fn demographics(bundle: &Value) -> Option<Demographics> {
    let patient = resources_of_type(bundle, "Patient").into_iter().next()?;
    let name_obj = &patient["name"][0];
    let given = name_obj["given"][0].as_str().unwrap_or_default().to_string();
    let family = name_obj["family"].as_str().unwrap_or_default().to_string();
    let birth_date = str_field(&patient, "birthDate");
    Some(Demographics {
        patient_id: str_field(&patient, "id"),
        name: format!("{given} {family}").trim().to_string(),
        given_name: given,
        family_name: family,
        gender: str_field(&patient, "gender"),
        age: age_from_birth_date(&birth_date),
        birth_date,
    })
}

fn age_from_birth_date(birth_date: &str) -> Option<u32> {
    let born = NaiveDate::parse_from_str(birth_date, "%Y-%m-%d").ok()?;
    let today = Utc::now().date_naive();
    let mut age = today.year() - born.year();
    if (today.month(), today.day()) < (born.month(), born.day()) {
        age -= 1;
    }
    u32::try_from(age).ok()
}

// ─── Field helpers ────────────────────────────────────────────────────────────

fn str_field(resource: &Value, field: &str) -> String {
    resource[field].as_str().unwrap_or_default().to_string()
}

fn text_of(codeable: &Value) -> String {
    codeable["text"].as_str().unwrap_or_default().to_string()
}

/// `(code, system)` of the first coding in a CodeableConcept.
fn first_coding(codeable: &Value) -> (String, String) {
    match codeable["coding"][0].as_object() {
        Some(coding) => (
            coding.get("code").and_then(|c| c.as_str()).unwrap_or_default().to_string(),
            coding.get("system").and_then(|s| s.as_str()).unwrap_or_default().to_string(),
        ),
        None => (String::new(), String::new()),
    }
}

fn first_coding_display(codeable: &Value) -> String {
    codeable["coding"][0]["display"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

fn category_codes(resource: &Value) -> Vec<String> {
    resource["category"]
        .as_array()
        .map(|cats| {
            cats.iter()
                .flat_map(|cat| {
                    cat["coding"]
                        .as_array()
                        .map(|codings| {
                            codings
                                .iter()
                                .filter_map(|c| c["code"].as_str())
                                .filter(|c| !c.is_empty())
                                .map(str::to_string)
                                .collect::<Vec<_>>()
                        })
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default()
}

fn observation_value(resource: &Value) -> (Option<ObservationValue>, Option<String>) {
    if let Some(q) = resource.get("valueQuantity") {
        let value = q["value"].as_f64().map(ObservationValue::Number);
        let unit = q["unit"].as_str().map(str::to_string);
        return (value, unit);
    }
    if let Some(s) = resource["valueString"].as_str() {
        return (Some(ObservationValue::Text(s.to_string())), None);
    }
    if let Some(cc) = resource.get("valueCodeableConcept") {
        return (Some(ObservationValue::Text(text_of(cc))), None);
    }
    (None, None)
}

fn reference_range(resource: &Value) -> Option<String> {
    let range = resource["referenceRange"].as_array()?.first()?;
    let low = range["low"]["value"].as_f64()?;
    let high = range["high"]["value"].as_f64()?;
    Some(format!("{low}-{high}"))
}

fn non_empty_or(s: String, fallback: &str) -> String {
    if s.is_empty() {
        fallback.to_string()
    } else {
        s
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
