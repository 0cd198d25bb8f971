// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Pipeline executor.
//!
//! State flows through a pipeline as a JSON value, usually a list of row
//! objects, collapsing to a map or a number at a terminal aggregation.
//! Failures never escape as errors: `Sandbox::run` always returns a report
//! value with `status: success | error`, and an error carries a trace
//! naming the pipeline and step that failed.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::debug;

use ward_store::batch::numeric_stats;
use ward_store::{extract, CountEntry, RecordStore};

use crate::program::{parse_program, CmpOp, Pipeline, Source, Step};
use crate::vision::{parse_rhythm_report, rhythm_prompt, RhythmAssessment, VisionOracle};

pub type ProgressFn = Box<dyn Fn(&str) + Send + Sync>;

pub struct Sandbox {
    store: Arc<RecordStore>,
    oracle: Arc<dyn VisionOracle>,
    progress: Option<ProgressFn>,
}

struct ExecError {
    message: String,
    trace: String,
}

impl Sandbox {
    pub fn new(store: Arc<RecordStore>, oracle: Arc<dyn VisionOracle>) -> Self {
        Self { store, oracle, progress: None }
    }

    /// Attach a progress sink; programs report coarse milestones through it.
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    fn log(&self, message: &str) {
        debug!(target: "ward::sandbox", "{message}");
        if let Some(progress) = &self.progress {
            progress(message);
        }
    }

    /// Run a program.  Always returns a report value; parse errors, unknown
    /// operations and runtime failures are data in the report, never `Err`.
    pub async fn run(&self, description: &str, source: &str, patient_limit: usize) -> Value {
        self.log(&format!("analysis started: {description}"));
        let program = match parse_program(source) {
            Ok(p) => p,
            Err(message) => {
                return json!({
                    "status": "error",
                    "error": message,
                    "description": description,
                });
            }
        };

        let mut result = Map::new();
        for (key, pipeline) in &program.analyze {
            match self.run_pipeline(key, pipeline, patient_limit).await {
                Ok(value) => {
                    result.insert(key.clone(), value);
                }
                Err(e) => {
                    return json!({
                        "status": "error",
                        "error": e.message,
                        "trace": e.trace,
                        "description": description,
                    });
                }
            }
        }
        self.log("analysis complete");

        json!({
            "status": "success",
            "description": description,
            "patient_limit": patient_limit,
            "result": Value::Object(result),
        })
    }

    async fn run_pipeline(
        &self,
        key: &str,
        pipeline: &Pipeline,
        patient_limit: usize,
    ) -> Result<Value, ExecError> {
        let mut state = self.seed(&pipeline.source, patient_limit);
        for (i, step) in pipeline.steps.iter().enumerate() {
            state = self
                .apply(step, state)
                .await
                .map_err(|message| ExecError {
                    message,
                    trace: format!("analyze.{key} step {i} ({})", step_name(step)),
                })?;
        }
        Ok(state)
    }

    fn seed(&self, source: &Source, patient_limit: usize) -> Value {
        match source {
            Source::Patients { limit } => {
                let ids = self.store.list_ids(Some(limit.unwrap_or(patient_limit)));
                self.log(&format!("seeded {} patient rows", ids.len()));
                Value::Array(ids.into_iter().map(|id| json!({ "patient_id": id })).collect())
            }
            Source::Patient { patient_id } => {
                Value::Array(vec![json!({ "patient_id": patient_id })])
            }
            Source::DicomScan {} => {
                let paths = self.store.list_dicom_paths();
                self.log(&format!("seeded {} DICOM rows", paths.len()));
                Value::Array(
                    paths
                        .into_iter()
                        .map(|p| json!({ "file": p.to_string_lossy() }))
                        .collect(),
                )
            }
        }
    }

    async fn apply(&self, step: &Step, state: Value) -> Result<Value, String> {
        match step {
            Step::Conditions => self.extract_rows(state, |bundle, pid| {
                extract::conditions(bundle)
                    .into_iter()
                    .map(|c| tagged_row(&c, pid))
                    .collect()
            }),
            Step::Observations { category } => {
                let category = category.clone();
                self.extract_rows(state, move |bundle, pid| {
                    let mut observations = extract::observations(bundle);
                    if let Some(cat) = &category {
                        let cat = cat.to_lowercase();
                        observations.retain(|o| o.category.iter().any(|c| c.to_lowercase() == cat));
                    }
                    observations.into_iter().map(|o| tagged_row(&o, pid)).collect()
                })
            }
            Step::Medications => self.extract_rows(state, |bundle, pid| {
                extract::medications(bundle)
                    .into_iter()
                    .map(|m| tagged_row(&m, pid))
                    .collect()
            }),
            Step::Resources { resource_type } => {
                let ty = resource_type.clone();
                self.extract_rows(state, move |bundle, pid| {
                    extract::resources_of_type(bundle, &ty)
                        .into_iter()
                        .map(|r| json!({ "patient_id": pid, "resource": r }))
                        .collect()
                })
            }
            Step::FilterHasCondition { contains } => {
                let needles: Vec<String> = contains.iter().map(|s| s.to_lowercase()).collect();
                let rows = into_rows(state)?;
                let mut kept = Vec::new();
                for row in rows {
                    let pid = patient_id_of(&row)?;
                    let Some(bundle) = self.store.load_bundle(&pid) else { continue };
                    let matched = extract::conditions(&bundle).iter().any(|c| {
                        let name = c.name.to_lowercase();
                        needles.iter().any(|n| name.contains(n))
                    });
                    if matched {
                        kept.push(row);
                    }
                }
                Ok(Value::Array(kept))
            }
            Step::FilterByText { field, contains, case_sensitive } => {
                let rows = into_rows(state)?;
                let needle = if *case_sensitive { contains.clone() } else { contains.to_lowercase() };
                Ok(Value::Array(
                    rows.into_iter()
                        .filter(|row| {
                            let text = field_as_string(row, field);
                            let haystack = if *case_sensitive { text } else { text.to_lowercase() };
                            haystack.contains(&needle)
                        })
                        .collect(),
                ))
            }
            Step::FilterByValue { field, cmp, threshold } => {
                let rows = into_rows(state)?;
                Ok(Value::Array(
                    rows.into_iter()
                        .filter(|row| match field_as_number(row, field) {
                            Some(n) => compare(n, *cmp, *threshold),
                            None => false,
                        })
                        .collect(),
                ))
            }
            Step::CountByField { field } => {
                let rows = into_rows(state)?;
                let mut counts: BTreeMap<String, u32> = BTreeMap::new();
                for row in &rows {
                    *counts.entry(field_label(row, field)).or_default() += 1;
                }
                let mut entries: Vec<CountEntry> = counts
                    .into_iter()
                    .map(|(name, count)| CountEntry { name, count })
                    .collect();
                entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
                serde_json::to_value(entries).map_err(|e| e.to_string())
            }
            Step::GroupByField { field } => {
                let rows = into_rows(state)?;
                let mut groups: BTreeMap<String, Vec<Value>> = BTreeMap::new();
                for row in rows {
                    groups.entry(field_label(&row, field)).or_default().push(row);
                }
                serde_json::to_value(groups).map_err(|e| e.to_string())
            }
            Step::AggregateNumeric { field } => {
                let rows = into_rows(state)?;
                let values: Vec<f64> = rows
                    .iter()
                    .filter_map(|row| field_as_number(row, field))
                    .collect();
                serde_json::to_value(numeric_stats(&values)).map_err(|e| e.to_string())
            }
            Step::Limit { n } => {
                let mut rows = into_rows(state)?;
                rows.truncate(*n);
                Ok(Value::Array(rows))
            }
            Step::Count => {
                let rows = into_rows(state)?;
                Ok(json!(rows.len()))
            }
            Step::DicomMetadata => {
                let rows = into_rows(state)?;
                let mut out = Vec::with_capacity(rows.len());
                for row in &rows {
                    let file = row["file"]
                        .as_str()
                        .ok_or_else(|| "rows have no \"file\" field".to_string())?;
                    let meta = self
                        .store
                        .dicom_metadata_for_path(std::path::Path::new(file));
                    out.push(serde_json::to_value(meta).map_err(|e| e.to_string())?);
                }
                Ok(Value::Array(out))
            }
            Step::LoadEcg => {
                let rows = into_rows(state)?;
                let mut out = Vec::new();
                for row in rows {
                    let pid = patient_id_of(&row)?;
                    if let Some(image) = self.store.load_ecg(&pid) {
                        out.push(json!({ "patient_id": pid, "image_b64": image }));
                    }
                }
                self.log(&format!("loaded {} ECG images", out.len()));
                Ok(Value::Array(out))
            }
            Step::LoadDicom { index } => {
                let rows = into_rows(state)?;
                let mut out = Vec::new();
                for row in rows {
                    let pid = patient_id_of(&row)?;
                    if let Some(image) = self.store.load_dicom_base64(&pid, index.unwrap_or(0)) {
                        out.push(json!({ "patient_id": pid, "image_b64": image }));
                    }
                }
                self.log(&format!("loaded {} DICOM images", out.len()));
                Ok(Value::Array(out))
            }
            Step::AnalyzeImage { prompt } => {
                let rows = into_rows(state)?;
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    let image = row["image_b64"]
                        .as_str()
                        .ok_or_else(|| "rows have no \"image_b64\" field".to_string())?
                        .to_string();
                    // Oracle failures become per-row data, matching the rest
                    // of the batch machinery's totality.
                    let analysis = match self.oracle.analyze(prompt, vec![image]).await {
                        Ok(text) => text,
                        Err(e) => format!("Vision analysis error: {e}"),
                    };
                    let mut result = Map::new();
                    if let Some(pid) = row["patient_id"].as_str() {
                        result.insert("patient_id".into(), json!(pid));
                    }
                    result.insert("analysis".into(), json!(analysis));
                    out.push(Value::Object(result));
                }
                Ok(Value::Array(out))
            }
            Step::EcgRhythm { clinical_context } => {
                let rows = into_rows(state)?;
                let context = clinical_context.clone().unwrap_or_default();
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    let pid = patient_id_of(&row)?;
                    let assessment = self.assess_rhythm(&pid, &context).await;
                    out.push(serde_json::to_value(assessment).map_err(|e| e.to_string())?);
                }
                Ok(Value::Array(out))
            }
        }
    }

    async fn assess_rhythm(&self, patient_id: &str, context: &str) -> RhythmAssessment {
        let Some(ecg) = self.store.load_ecg(patient_id) else {
            return RhythmAssessment::unavailable(patient_id);
        };
        let prompt = rhythm_prompt(patient_id, context);
        match self.oracle.analyze(&prompt, vec![ecg]).await {
            Ok(raw) => parse_rhythm_report(patient_id, &raw),
            Err(e) => {
                let mut assessment = RhythmAssessment::unavailable(patient_id);
                assessment.ecg_available = true;
                assessment.rhythm = "Error".into();
                assessment.clinical_significance = format!("Analysis error: {e}");
                assessment
            }
        }
    }

    /// Shared shape for the per-patient extraction steps: load each row's
    /// bundle, flatten the extracted records, tag them with the patient id.
    /// Rows whose bundle is missing contribute nothing.
    fn extract_rows<F>(&self, state: Value, extract_one: F) -> Result<Value, String>
    where
        F: Fn(&Value, &str) -> Vec<Value>,
    {
        let rows = into_rows(state)?;
        let mut out = Vec::new();
        for row in &rows {
            let pid = patient_id_of(row)?;
            let Some(bundle) = self.store.load_bundle(&pid) else { continue };
            out.extend(extract_one(&bundle, &pid));
        }
        Ok(Value::Array(out))
    }
}

// ─── Row helpers ──────────────────────────────────────────────────────────────

fn into_rows(state: Value) -> Result<Vec<Value>, String> {
    match state {
        Value::Array(rows) => Ok(rows),
        other => Err(format!(
            "step expects a row list, found {}",
            type_name(&other)
        )),
    }
}

fn patient_id_of(row: &Value) -> Result<String, String> {
    row["patient_id"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| "rows have no \"patient_id\" field".to_string())
}

/// Serialize an extracted record and tag it with its patient id.
fn tagged_row<T: serde::Serialize>(record: &T, patient_id: &str) -> Value {
    let mut value = serde_json::to_value(record).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.insert("patient_id".into(), json!(patient_id));
    }
    value
}

fn field_as_string(row: &Value, field: &str) -> String {
    match &row[field] {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn field_label(row: &Value, field: &str) -> String {
    let label = field_as_string(row, field);
    if label.is_empty() {
        "Unknown".to_string()
    } else {
        label
    }
}

fn field_as_number(row: &Value, field: &str) -> Option<f64> {
    match &row[field] {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn compare(value: f64, op: CmpOp, threshold: f64) -> bool {
    match op {
        CmpOp::Gt => value > threshold,
        CmpOp::Lt => value < threshold,
        CmpOp::Gte => value >= threshold,
        CmpOp::Lte => value <= threshold,
        CmpOp::Eq => value == threshold,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

fn step_name(step: &Step) -> &'static str {
    match step {
        Step::Conditions => "conditions",
        Step::Observations { .. } => "observations",
        Step::Medications => "medications",
        Step::Resources { .. } => "resources",
        Step::FilterHasCondition { .. } => "filter_has_condition",
        Step::FilterByText { .. } => "filter_by_text",
        Step::FilterByValue { .. } => "filter_by_value",
        Step::CountByField { .. } => "count_by_field",
        Step::GroupByField { .. } => "group_by_field",
        Step::AggregateNumeric { .. } => "aggregate_numeric",
        Step::Limit { .. } => "limit",
        Step::Count => "count",
        Step::DicomMetadata => "dicom_metadata",
        Step::LoadEcg => "load_ecg",
        Step::LoadDicom { .. } => "load_dicom",
        Step::AnalyzeImage { .. } => "analyze_image",
        Step::EcgRhythm { .. } => "ecg_rhythm",
    }
}
