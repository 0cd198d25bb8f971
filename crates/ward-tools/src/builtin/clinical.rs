// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Single-patient clinical data tools: conditions, observations,
//! medications.  All of them shape their result so the emptiness
//! classifier recognises a miss (`count: 0` plus an empty collection).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use ward_store::{extract, RecordStore};

use crate::tool::{arg_str, require_str, Tool, ToolError};

fn not_found(patient_id: &str) -> Value {
    json!(format!("Patient {patient_id} not found in record corpus"))
}

pub struct GetPatientConditionsTool {
    store: Arc<RecordStore>,
}

impl GetPatientConditionsTool {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetPatientConditionsTool {
    fn name(&self) -> &str {
        "get_patient_conditions"
    }

    fn description(&self) -> &str {
        "Get a patient's conditions/diagnoses, optionally filtered by a case-insensitive \
         substring of the condition name. This covers diagnoses only; for allergies, \
         procedures or immunizations use run_analysis_program."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "patient_id": {
                    "type": "string",
                    "description": "The patient's unique identifier"
                },
                "condition_filter": {
                    "type": "string",
                    "description": "Substring filter on the condition name, e.g. \"diabetes\""
                }
            },
            "required": ["patient_id"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let patient_id = require_str(args, "patient_id")?;
        let Some(bundle) = self.store.load_bundle(patient_id) else {
            return Ok(not_found(patient_id));
        };
        let mut conditions = extract::conditions(&bundle);
        if let Some(filter) = arg_str(args, "condition_filter") {
            let needle = filter.to_lowercase();
            conditions.retain(|c| c.name.to_lowercase().contains(&needle));
        }
        Ok(json!({
            "patient_id": patient_id,
            "count": conditions.len(),
            "conditions": conditions,
        }))
    }
}

pub struct GetPatientObservationsTool {
    store: Arc<RecordStore>,
}

impl GetPatientObservationsTool {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetPatientObservationsTool {
    fn name(&self) -> &str {
        "get_patient_observations"
    }

    fn description(&self) -> &str {
        "Get a patient's observations (labs, vitals). Filter by FHIR category \
         ('laboratory' or 'vital-signs') and/or a substring of the observation code."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "patient_id": {
                    "type": "string",
                    "description": "The patient's unique identifier"
                },
                "category": {
                    "type": "string",
                    "description": "FHIR category filter: 'laboratory' or 'vital-signs'"
                },
                "code_filter": {
                    "type": "string",
                    "description": "Substring filter on the observation code, e.g. \"glucose\""
                }
            },
            "required": ["patient_id"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let patient_id = require_str(args, "patient_id")?;
        let Some(bundle) = self.store.load_bundle(patient_id) else {
            return Ok(not_found(patient_id));
        };
        let mut observations = extract::observations(&bundle);
        if let Some(category) = arg_str(args, "category") {
            let cat = category.to_lowercase();
            observations.retain(|o| o.category.iter().any(|c| c.to_lowercase() == cat));
        }
        if let Some(filter) = arg_str(args, "code_filter") {
            let needle = filter.to_lowercase();
            observations.retain(|o| o.code.to_lowercase().contains(&needle));
        }
        Ok(json!({
            "patient_id": patient_id,
            "count": observations.len(),
            "observations": observations,
        }))
    }
}

pub struct GetPatientMedicationsTool {
    store: Arc<RecordStore>,
}

impl GetPatientMedicationsTool {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetPatientMedicationsTool {
    fn name(&self) -> &str {
        "get_patient_medications"
    }

    fn description(&self) -> &str {
        "Get a patient's medication requests with dosage instructions, optionally filtered \
         by a substring of the medication name."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "patient_id": {
                    "type": "string",
                    "description": "The patient's unique identifier"
                },
                "medication_filter": {
                    "type": "string",
                    "description": "Substring filter on the medication name, e.g. \"metformin\""
                }
            },
            "required": ["patient_id"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let patient_id = require_str(args, "patient_id")?;
        let Some(bundle) = self.store.load_bundle(patient_id) else {
            return Ok(not_found(patient_id));
        };
        let mut medications = extract::medications(&bundle);
        if let Some(filter) = arg_str(args, "medication_filter") {
            let needle = filter.to_lowercase();
            medications.retain(|m| m.medication.to_lowercase().contains(&needle));
        }
        Ok(json!({
            "patient_id": patient_id,
            "count": medications.len(),
            "medications": medications,
        }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_fixtures::{args, fixture_store};

    #[tokio::test]
    async fn conditions_with_filter() {
        let (_dir, store) = fixture_store();
        let tool = GetPatientConditionsTool::new(store);
        let result = tool
            .execute(&args(json!({ "patient_id": "p1", "condition_filter": "diabetes" })))
            .await
            .unwrap();
        assert_eq!(result["count"], 1);
        assert_eq!(result["conditions"][0]["name"], "Diabetes mellitus");
    }

    #[tokio::test]
    async fn conditions_miss_is_classified_empty() {
        let (_dir, store) = fixture_store();
        let tool = GetPatientConditionsTool::new(store);
        let result = tool
            .execute(&args(json!({ "patient_id": "p1", "condition_filter": "gout" })))
            .await
            .unwrap();
        assert!(crate::is_empty_result(&result));
    }

    #[tokio::test]
    async fn observations_category_and_code_filters_compose() {
        let (_dir, store) = fixture_store();
        let tool = GetPatientObservationsTool::new(store);
        let result = tool
            .execute(&args(json!({
                "patient_id": "p1",
                "category": "laboratory",
                "code_filter": "glucose"
            })))
            .await
            .unwrap();
        assert_eq!(result["count"], 1);
        assert_eq!(result["observations"][0]["code"], "Glucose");
    }

    #[tokio::test]
    async fn medications_for_patient_without_any() {
        let (_dir, store) = fixture_store();
        let tool = GetPatientMedicationsTool::new(store);
        let result = tool.execute(&args(json!({ "patient_id": "p3" }))).await.unwrap();
        assert_eq!(result["count"], 0);
        assert!(crate::is_empty_result(&result));
    }

    #[tokio::test]
    async fn unknown_patient_returns_not_found_string() {
        let (_dir, store) = fixture_store();
        let tool = GetPatientConditionsTool::new(store);
        let result = tool.execute(&args(json!({ "patient_id": "ghost" }))).await.unwrap();
        assert!(result.as_str().unwrap().contains("not found"));
    }
}
