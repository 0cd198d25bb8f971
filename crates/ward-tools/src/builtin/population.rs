// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Population-level analysis tools over the batch primitives.  These fetch
//! patient ids internally; the model is told not to call `list_patients`
//! first.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use ward_store::{batch_conditions, batch_medications, batch_observations, batch_resources, RecordStore};

use crate::tool::{arg_str, arg_usize, require_str, Tool, ToolError};

const DEFAULT_PATIENT_LIMIT: usize = 50;

fn to_value<T: serde::Serialize>(report: T) -> Result<Value, ToolError> {
    serde_json::to_value(report).map_err(|e| ToolError::Runtime(e.to_string()))
}

pub struct AnalyzeBatchConditionsTool {
    store: Arc<RecordStore>,
}

impl AnalyzeBatchConditionsTool {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for AnalyzeBatchConditionsTool {
    fn name(&self) -> &str {
        "analyze_batch_conditions"
    }

    fn description(&self) -> &str {
        "Analyze conditions across many patients at once: prevalence counts plus \
         per-patient condition lists. The filter is a SINGLE case-insensitive substring, \
         no AND/OR logic; for compound condition logic use run_analysis_program."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "patient_limit": {
                    "type": "integer",
                    "description": "How many patients to analyze (default 50)"
                },
                "condition_filter": {
                    "type": "string",
                    "description": "Single substring filter on condition names, e.g. \"diabetes\""
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let limit = arg_usize(args, "patient_limit").unwrap_or(DEFAULT_PATIENT_LIMIT);
        let ids = self.store.list_ids(Some(limit));
        let report = batch_conditions(&self.store, &ids, arg_str(args, "condition_filter")).await;
        to_value(report)
    }
}

pub struct AnalyzeBatchObservationsTool {
    store: Arc<RecordStore>,
}

impl AnalyzeBatchObservationsTool {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for AnalyzeBatchObservationsTool {
    fn name(&self) -> &str {
        "analyze_batch_observations"
    }

    fn description(&self) -> &str {
        "Analyze observations (labs, vitals) across many patients, with automatic numeric \
         statistics (count/min/max/mean/sum) per observation code."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "patient_limit": {
                    "type": "integer",
                    "description": "How many patients to analyze (default 50)"
                },
                "category": {
                    "type": "string",
                    "description": "FHIR category filter: 'laboratory' or 'vital-signs'"
                },
                "code_filter": {
                    "type": "string",
                    "description": "Substring filter on observation codes, e.g. \"glucose\""
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let limit = arg_usize(args, "patient_limit").unwrap_or(DEFAULT_PATIENT_LIMIT);
        let ids = self.store.list_ids(Some(limit));
        let report = batch_observations(
            &self.store,
            &ids,
            arg_str(args, "category"),
            arg_str(args, "code_filter"),
        )
        .await;
        to_value(report)
    }
}

pub struct AnalyzeBatchMedicationsTool {
    store: Arc<RecordStore>,
}

impl AnalyzeBatchMedicationsTool {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for AnalyzeBatchMedicationsTool {
    fn name(&self) -> &str {
        "analyze_batch_medications"
    }

    fn description(&self) -> &str {
        "Analyze medication requests across many patients: frequency counts plus \
         per-patient medication lists."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "patient_limit": {
                    "type": "integer",
                    "description": "How many patients to analyze (default 50)"
                },
                "medication_filter": {
                    "type": "string",
                    "description": "Substring filter on medication names, e.g. \"metformin\""
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let limit = arg_usize(args, "patient_limit").unwrap_or(DEFAULT_PATIENT_LIMIT);
        let ids = self.store.list_ids(Some(limit));
        let report =
            batch_medications(&self.store, &ids, arg_str(args, "medication_filter")).await;
        to_value(report)
    }
}

pub struct SearchPatientResourcesTool {
    store: Arc<RecordStore>,
}

impl SearchPatientResourcesTool {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SearchPatientResourcesTool {
    fn name(&self) -> &str {
        "search_patient_resources"
    }

    fn description(&self) -> &str {
        "Search any FHIR resource type across many patients; use for resource types \
         without a dedicated tool (AllergyIntolerance, Procedure, Immunization, CarePlan)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "resource_type": {
                    "type": "string",
                    "description": "FHIR resource type, e.g. 'AllergyIntolerance'"
                },
                "patient_limit": {
                    "type": "integer",
                    "description": "How many patients to search (default 50)"
                },
                "text_filter": {
                    "type": "string",
                    "description": "Substring matched against the resource's code/text fields"
                }
            },
            "required": ["resource_type"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let resource_type = require_str(args, "resource_type")?;
        let limit = arg_usize(args, "patient_limit").unwrap_or(DEFAULT_PATIENT_LIMIT);
        let ids = self.store.list_ids(Some(limit));
        let report =
            batch_resources(&self.store, &ids, resource_type, arg_str(args, "text_filter")).await;
        to_value(report)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
