// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use ward_sandbox::VisionOracle;

use crate::tool::{arg_usize, require_str, Tool, ToolError};

const DEFAULT_MAX_IMAGES: usize = 3;

/// Send previously loaded base64 images to the vision model with a clinical
/// question.  Pairs with `run_analysis_program`'s load_ecg/load_dicom steps.
pub struct AnalyzeMedicalImagesTool {
    oracle: Arc<dyn VisionOracle>,
}

impl AnalyzeMedicalImagesTool {
    pub fn new(oracle: Arc<dyn VisionOracle>) -> Self {
        Self { oracle }
    }
}

#[async_trait]
impl Tool for AnalyzeMedicalImagesTool {
    fn name(&self) -> &str {
        "analyze_medical_images"
    }

    fn description(&self) -> &str {
        "Analyze medical images (ECG tracings, DICOM renders) with the vision model. \
         Pass base64 image data from a previous run_analysis_program result; do not \
         re-load images that are already in the outputs."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "analysis_prompt": {
                    "type": "string",
                    "description": "The clinical question to answer about the images"
                },
                "images": {
                    "type": "array",
                    "description": "Base64 PNG payloads, e.g. image_b64 values from earlier outputs"
                },
                "max_images": {
                    "type": "integer",
                    "description": "Analyze at most this many images (default 3)"
                }
            },
            "required": ["analysis_prompt", "images"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let prompt = require_str(args, "analysis_prompt")?;
        let max_images = arg_usize(args, "max_images").unwrap_or(DEFAULT_MAX_IMAGES);

        let mut images: Vec<String> = args
            .get("images")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if images.is_empty() {
            return Err(ToolError::InvalidArguments(
                "\"images\" must contain at least one base64 image".into(),
            ));
        }
        images.truncate(max_images.max(1));
        let analyzed = images.len();

        let analysis = self
            .oracle
            .analyze(prompt, images)
            .await
            .map_err(ToolError::Runtime)?;

        Ok(json!({ "images_analyzed": analyzed, "analysis": analysis }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_fixtures::{args, CannedOracle};

    #[tokio::test]
    async fn analyzes_and_reports_image_count() {
        let oracle = CannedOracle::ok("no acute findings");
        let tool = AnalyzeMedicalImagesTool::new(oracle.clone());
        let result = tool
            .execute(&args(json!({
                "analysis_prompt": "any abnormality?",
                "images": ["QUJD", "REVG"]
            })))
            .await
            .unwrap();
        assert_eq!(result["images_analyzed"], 2);
        assert_eq!(result["analysis"], "no acute findings");
        assert_eq!(oracle.image_batches.lock().unwrap()[0], 2);
    }

    #[tokio::test]
    async fn truncates_to_max_images() {
        let oracle = CannedOracle::ok("ok");
        let tool = AnalyzeMedicalImagesTool::new(oracle.clone());
        let result = tool
            .execute(&args(json!({
                "analysis_prompt": "compare",
                "images": ["a", "b", "c", "d", "e"],
                "max_images": 2
            })))
            .await
            .unwrap();
        assert_eq!(result["images_analyzed"], 2);
    }

    #[tokio::test]
    async fn default_cap_is_three() {
        let oracle = CannedOracle::ok("ok");
        let tool = AnalyzeMedicalImagesTool::new(oracle);
        let result = tool
            .execute(&args(json!({
                "analysis_prompt": "compare",
                "images": ["a", "b", "c", "d"]
            })))
            .await
            .unwrap();
        assert_eq!(result["images_analyzed"], 3);
    }

    #[tokio::test]
    async fn empty_image_list_is_invalid() {
        let oracle = CannedOracle::ok("ok");
        let tool = AnalyzeMedicalImagesTool::new(oracle);
        let err = tool
            .execute(&args(json!({ "analysis_prompt": "x", "images": [] })))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn oracle_failure_is_runtime_error() {
        let oracle = CannedOracle::failing("vision model offline");
        let tool = AnalyzeMedicalImagesTool::new(oracle);
        let err = tool
            .execute(&args(json!({ "analysis_prompt": "x", "images": ["a"] })))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Runtime(_)));
    }
}
