// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use ward_sandbox::Sandbox;

use crate::tool::{arg_usize, require_str, Tool, ToolError};

const DEFAULT_PATIENT_LIMIT: usize = 50;

/// The escape hatch for everything the dedicated tools cannot express:
/// resource types without a tool, compound AND/OR condition logic,
/// cross-resource joins, and imaging workflows.
pub struct RunAnalysisProgramTool {
    sandbox: Arc<Sandbox>,
}

impl RunAnalysisProgramTool {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for RunAnalysisProgramTool {
    fn name(&self) -> &str {
        "run_analysis_program"
    }

    fn description(&self) -> &str {
        "Run a custom analysis program against the record corpus. Use when no dedicated \
         tool fits: compound AND/OR condition logic, resource types without a tool \
         (allergies, procedures, immunizations), cross-resource joins, or imaging \
         workflows. The program is a JSON object with a top-level \"analyze\" object \
         mapping output names to pipelines. Each pipeline has a \"source\" \
         ({\"from\": \"patients\"|\"patient\"|\"dicom_scan\"}) and \"steps\", chosen from: \
         conditions, observations, medications, resources, filter_has_condition, \
         filter_by_text, filter_by_value, count_by_field, group_by_field, \
         aggregate_numeric, limit, count, dicom_metadata, load_ecg, load_dicom, \
         analyze_image, ecg_rhythm. \
         Example (patients with hypertension AND diabetes): \
         {\"analyze\": {\"both\": {\"source\": {\"from\": \"patients\"}, \"steps\": \
         [{\"op\": \"filter_has_condition\", \"contains\": [\"hypertension\"]}, \
         {\"op\": \"filter_has_condition\", \"contains\": [\"diabetes\"]}]}}}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "analysis_description": {
                    "type": "string",
                    "description": "What the analysis computes, in one sentence"
                },
                "program": {
                    "description": "The analysis program: a JSON object (or JSON-encoded \
                                    string) with a top-level \"analyze\" entry"
                },
                "patient_limit": {
                    "type": "integer",
                    "description": "Default patient count for 'patients' sources (default 50)"
                }
            },
            "required": ["analysis_description", "program"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let description = require_str(args, "analysis_description")?;
        let program = match args.get("program") {
            Some(Value::String(s)) => s.clone(),
            Some(value @ Value::Object(_)) => value.to_string(),
            Some(other) => {
                return Err(ToolError::InvalidArguments(format!(
                    "\"program\" must be an object or JSON string, got {other}"
                )))
            }
            None => {
                return Err(ToolError::InvalidArguments(
                    "missing required argument \"program\"".into(),
                ))
            }
        };
        let patient_limit = arg_usize(args, "patient_limit").unwrap_or(DEFAULT_PATIENT_LIMIT);
        // The sandbox itself never fails; error reports are results.
        Ok(self.sandbox.run(description, &program, patient_limit).await)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
