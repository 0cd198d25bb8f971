// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The analysis-program DSL.
//!
//! A program is a JSON object with a top-level `analyze` entry mapping
//! output keys to pipelines.  Each pipeline names a data source and a list
//! of whitelisted step operations:
//!
//! ```json
//! {
//!   "analyze": {
//!     "diabetics_on_metformin": {
//!       "source": { "from": "patients", "limit": 100 },
//!       "steps": [
//!         { "op": "filter_has_condition", "contains": ["diabetes"] },
//!         { "op": "medications" },
//!         { "op": "filter_by_text", "field": "medication", "contains": "metformin" },
//!         { "op": "count_by_field", "field": "patient_id" }
//!       ]
//!     }
//!   }
//! }
//! ```
//!
//! Decoding is strict: an unknown `op` or a wrong field shape fails the
//! parse, and the failure surfaces as a structured error report rather than
//! an exception.

use std::collections::BTreeMap;

use serde::Deserialize;

/// A parsed program: named pipelines under `analyze`.
#[derive(Debug, Deserialize)]
pub struct Program {
    pub analyze: BTreeMap<String, Pipeline>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Pipeline {
    pub source: Source,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Where a pipeline's rows come from.
#[derive(Debug, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum Source {
    /// Patient-id rows; `limit` defaults to the call's patient limit.
    Patients { limit: Option<usize> },
    /// A single patient's id row.
    Patient { patient_id: String },
    /// One row per DICOM file in the corpus.
    DicomScan {},
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
}

/// The whitelisted operation set.  Anything not listed here does not exist
/// inside the sandbox.  Stray extra fields on a step are ignored rather
/// than rejected; models pad programs with commentary keys.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Patient rows → one row per condition, tagged with `patient_id`.
    Conditions,
    /// Patient rows → one row per observation, optionally category-filtered.
    Observations { category: Option<String> },
    /// Patient rows → one row per medication request.
    Medications,
    /// Patient rows → one row per resource of the given FHIR type.
    Resources { resource_type: String },
    /// Keep patient rows whose bundle has a condition matching any of the
    /// given substrings.  Chain the step for AND logic.
    FilterHasCondition { contains: Vec<String> },
    /// Keep rows whose `field` stringifies to something containing `contains`.
    FilterByText {
        field: String,
        contains: String,
        #[serde(default)]
        case_sensitive: bool,
    },
    /// Keep rows whose numeric `field` compares true against `threshold`.
    FilterByValue {
        field: String,
        cmp: CmpOp,
        threshold: f64,
    },
    /// Rows → `[{name, count}]` sorted by frequency descending.
    CountByField { field: String },
    /// Rows → `{value: [rows]}`.
    GroupByField { field: String },
    /// Rows → `{count, min, max, mean, sum}` over a numeric field.
    AggregateNumeric { field: String },
    /// Keep the first `n` rows.
    Limit { n: usize },
    /// Rows → row count.
    Count,
    /// DICOM-file rows → filename-derived metadata rows.
    DicomMetadata,
    /// Patient rows → `{patient_id, image_b64}`; rows without an ECG drop.
    LoadEcg,
    /// Patient rows → `{patient_id, image_b64}` from the patient's DICOM
    /// file at `index` (default 0); rows without one drop.
    LoadDicom { index: Option<usize> },
    /// Rows with `image_b64` → `{patient_id?, analysis}` via the vision
    /// oracle.
    AnalyzeImage { prompt: String },
    /// Patient rows → structured ECG rhythm assessment via the vision
    /// oracle.
    EcgRhythm { clinical_context: Option<String> },
}

/// Parse program source text.  The two failure modes the contract names
/// (unparseable source, missing `analyze` entry) get distinct
/// messages.
pub fn parse_program(source: &str) -> Result<Program, String> {
    let value: serde_json::Value = serde_json::from_str(source)
        .map_err(|e| format!("program is not valid JSON: {e}"))?;
    if value.get("analyze").is_none() {
        return Err("program must define an \"analyze\" entry".to_string());
    }
    serde_json::from_value(value).map_err(|e| format!("invalid program: {e}"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_program() {
        let program = parse_program(
            r#"{ "analyze": { "out": { "source": { "from": "patients" } } } }"#,
        )
        .unwrap();
        assert!(program.analyze.contains_key("out"));
        assert!(program.analyze["out"].steps.is_empty());
    }

    #[test]
    fn parses_steps_with_arguments() {
        let program = parse_program(
            r#"{ "analyze": { "out": {
                "source": { "from": "patients", "limit": 10 },
                "steps": [
                    { "op": "conditions" },
                    { "op": "filter_by_text", "field": "name", "contains": "diabetes" },
                    { "op": "count_by_field", "field": "name" }
                ]
            } } }"#,
        )
        .unwrap();
        assert_eq!(program.analyze["out"].steps.len(), 3);
    }

    #[test]
    fn not_json_is_a_syntax_error() {
        let err = parse_program("def analyze(): pass").unwrap_err();
        assert!(err.contains("not valid JSON"));
    }

    #[test]
    fn missing_analyze_entry_is_reported() {
        let err = parse_program(r#"{ "main": {} }"#).unwrap_err();
        assert!(err.contains("\"analyze\""));
    }

    #[test]
    fn unknown_op_is_rejected() {
        let err = parse_program(
            r#"{ "analyze": { "out": {
                "source": { "from": "patients" },
                "steps": [ { "op": "exfiltrate_everything" } ]
            } } }"#,
        )
        .unwrap_err();
        assert!(err.contains("invalid program"));
    }

    #[test]
    fn unknown_source_is_rejected() {
        assert!(parse_program(
            r#"{ "analyze": { "out": { "source": { "from": "the_internet" } } } }"#
        )
        .is_err());
    }

    #[test]
    fn stray_fields_on_steps_are_ignored() {
        let program = parse_program(
            r#"{ "analyze": { "out": {
                "source": { "from": "patients" },
                "steps": [ { "op": "count", "comment": "why not" } ]
            } } }"#,
        )
        .unwrap();
        assert_eq!(program.analyze["out"].steps.len(), 1);
    }

    #[test]
    fn filter_by_value_uses_cmp_field() {
        let program = parse_program(
            r#"{ "analyze": { "out": {
                "source": { "from": "patients" },
                "steps": [ { "op": "filter_by_value", "field": "value", "cmp": "gte", "threshold": 5 } ]
            } } }"#,
        )
        .unwrap();
        assert_eq!(program.analyze["out"].steps.len(), 1);
    }

    #[test]
    fn cmp_ops_deserialize() {
        for (text, expected) in [
            ("\"gt\"", CmpOp::Gt),
            ("\"lt\"", CmpOp::Lt),
            ("\"gte\"", CmpOp::Gte),
            ("\"lte\"", CmpOp::Lte),
            ("\"eq\"", CmpOp::Eq),
        ] {
            let parsed: CmpOp = serde_json::from_str(text).unwrap();
            assert_eq!(parsed, expected);
        }
    }
}
