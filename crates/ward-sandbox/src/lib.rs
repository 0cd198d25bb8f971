// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Restricted execution of model-authored analysis programs.
//!
//! Instead of a general-purpose interpreter, programs are a fixed JSON DSL
//! over the record-store primitives (see [`program`]): a closed operation
//! vocabulary, typed decoding, and structured error reports.  Vision
//! operations go through the injected [`VisionOracle`] so this crate never
//! depends on the model gateway.

mod interp;
pub mod program;
mod vision;

pub use interp::{ProgressFn, Sandbox};
pub use vision::{parse_rhythm_report, rhythm_prompt, RhythmAssessment, VisionOracle};

// ─── Integration tests over a fixture corpus ──────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use ward_store::RecordStore;

    use super::*;

    struct CannedOracle {
        reply: Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedOracle {
        fn ok(reply: &str) -> Arc<Self> {
            Arc::new(Self { reply: Ok(reply.to_string()), prompts: Mutex::new(Vec::new()) })
        }
        fn failing(msg: &str) -> Arc<Self> {
            Arc::new(Self { reply: Err(msg.to_string()), prompts: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl VisionOracle for CannedOracle {
        async fn analyze(&self, prompt: &str, _images: Vec<String>) -> Result<String, String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone()
        }
    }

    fn patient_bundle(id: &str, conditions: &[&str], glucose: Option<f64>) -> Value {
        let mut entries = vec![json!({
            "resource": {
                "resourceType": "Patient",
                "id": id,
                "gender": "male",
                "birthDate": "1970-01-01",
                "name": [{ "given": ["Jo"], "family": "Fixture" }]
            }
        })];
        for name in conditions {
            entries.push(json!({
                "resource": {
                    "resourceType": "Condition",
                    "code": { "text": name },
                    "clinicalStatus": { "coding": [{ "code": "active" }] }
                }
            }));
        }
        if let Some(value) = glucose {
            entries.push(json!({
                "resource": {
                    "resourceType": "Observation",
                    "code": { "text": "Glucose" },
                    "valueQuantity": { "value": value, "unit": "mg/dL" },
                    "category": [{ "coding": [{ "code": "laboratory" }] }]
                }
            }));
        }
        json!({ "resourceType": "Bundle", "entry": entries })
    }

    fn fixture_corpus() -> (tempfile::TempDir, Arc<RecordStore>) {
        let dir = tempfile::tempdir().unwrap();
        let write = |id: &str, bundle: Value| {
            std::fs::write(dir.path().join(format!("{id}.json")), bundle.to_string()).unwrap();
        };
        write("p1", patient_bundle("p1", &["Hypertension", "Diabetes mellitus"], Some(160.0)));
        write("p2", patient_bundle("p2", &["Diabetes mellitus"], Some(95.0)));
        write("p3", patient_bundle("p3", &["Asthma"], None));
        std::fs::write(dir.path().join("observations.csv"), "p1,RUNHLVBORw==\n").unwrap();
        let store = Arc::new(RecordStore::new(
            dir.path(),
            dir.path().join("observations.csv"),
            dir.path().join("dicom"),
        ));
        (dir, store)
    }

    fn sandbox(store: Arc<RecordStore>, oracle: Arc<dyn VisionOracle>) -> Sandbox {
        Sandbox::new(store, oracle)
    }

    #[tokio::test]
    async fn condition_count_pipeline() {
        let (_dir, store) = fixture_corpus();
        let sb = sandbox(store, CannedOracle::ok("unused"));
        let report = sb
            .run(
                "count conditions",
                r#"{ "analyze": { "counts": {
                    "source": { "from": "patients" },
                    "steps": [
                        { "op": "conditions" },
                        { "op": "count_by_field", "field": "name" }
                    ]
                } } }"#,
                50,
            )
            .await;
        assert_eq!(report["status"], "success");
        let counts = report["result"]["counts"].as_array().unwrap();
        assert_eq!(counts[0]["name"], "Diabetes mellitus");
        assert_eq!(counts[0]["count"], 2);
    }

    #[tokio::test]
    async fn compound_and_logic_via_chained_condition_filters() {
        let (_dir, store) = fixture_corpus();
        let sb = sandbox(store, CannedOracle::ok("unused"));
        let report = sb
            .run(
                "htn AND dm",
                r#"{ "analyze": { "both": {
                    "source": { "from": "patients" },
                    "steps": [
                        { "op": "filter_has_condition", "contains": ["hypertension"] },
                        { "op": "filter_has_condition", "contains": ["diabetes"] }
                    ]
                } } }"#,
                50,
            )
            .await;
        let rows = report["result"]["both"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["patient_id"], "p1");
    }

    #[tokio::test]
    async fn or_logic_within_one_filter() {
        let (_dir, store) = fixture_corpus();
        let sb = sandbox(store, CannedOracle::ok("unused"));
        let report = sb
            .run(
                "asthma OR htn",
                r#"{ "analyze": { "either": {
                    "source": { "from": "patients" },
                    "steps": [
                        { "op": "filter_has_condition", "contains": ["asthma", "hypertension"] },
                        { "op": "count" }
                    ]
                } } }"#,
                50,
            )
            .await;
        assert_eq!(report["result"]["either"], 2);
    }

    #[tokio::test]
    async fn numeric_filter_and_aggregate() {
        let (_dir, store) = fixture_corpus();
        let sb = sandbox(store, CannedOracle::ok("unused"));
        let report = sb
            .run(
                "elevated glucose",
                r#"{ "analyze": { "glucose": {
                    "source": { "from": "patients" },
                    "steps": [
                        { "op": "observations", "category": "laboratory" },
                        { "op": "filter_by_text", "field": "code", "contains": "glucose" },
                        { "op": "filter_by_value", "field": "value", "cmp": "gt", "threshold": 120 },
                        { "op": "aggregate_numeric", "field": "value" }
                    ]
                } } }"#,
                50,
            )
            .await;
        let stats = &report["result"]["glucose"];
        assert_eq!(stats["count"], 1);
        assert_eq!(stats["mean"], 160.0);
    }

    #[tokio::test]
    async fn patient_limit_defaults_the_patients_source() {
        let (_dir, store) = fixture_corpus();
        let sb = sandbox(store, CannedOracle::ok("unused"));
        let report = sb
            .run(
                "limited",
                r#"{ "analyze": { "n": {
                    "source": { "from": "patients" },
                    "steps": [ { "op": "count" } ]
                } } }"#,
                2,
            )
            .await;
        assert_eq!(report["result"]["n"], 2);
        assert_eq!(report["patient_limit"], 2);
    }

    #[tokio::test]
    async fn single_patient_source_and_resources() {
        let (_dir, store) = fixture_corpus();
        let sb = sandbox(store, CannedOracle::ok("unused"));
        let report = sb
            .run(
                "one patient",
                r#"{ "analyze": { "conds": {
                    "source": { "from": "patient", "patient_id": "p2" },
                    "steps": [ { "op": "resources", "resource_type": "Condition" }, { "op": "count" } ]
                } } }"#,
                50,
            )
            .await;
        assert_eq!(report["result"]["conds"], 1);
    }

    #[tokio::test]
    async fn syntax_error_is_a_structured_report() {
        let (_dir, store) = fixture_corpus();
        let sb = sandbox(store, CannedOracle::ok("unused"));
        let report = sb.run("broken", "def analyze(): pass", 10).await;
        assert_eq!(report["status"], "error");
        assert!(report["error"].as_str().unwrap().contains("not valid JSON"));
    }

    #[tokio::test]
    async fn missing_analyze_is_a_structured_report() {
        let (_dir, store) = fixture_corpus();
        let sb = sandbox(store, CannedOracle::ok("unused"));
        let report = sb.run("broken", r#"{ "main": [] }"#, 10).await;
        assert_eq!(report["status"], "error");
        assert!(report["error"].as_str().unwrap().contains("\"analyze\""));
    }

    #[tokio::test]
    async fn type_mismatch_carries_a_trace() {
        let (_dir, store) = fixture_corpus();
        let sb = sandbox(store, CannedOracle::ok("unused"));
        let report = sb
            .run(
                "bad types",
                r#"{ "analyze": { "x": {
                    "source": { "from": "patients" },
                    "steps": [ { "op": "count" }, { "op": "limit", "n": 5 } ]
                } } }"#,
                10,
            )
            .await;
        assert_eq!(report["status"], "error");
        assert!(report["error"].as_str().unwrap().contains("row list"));
        assert_eq!(report["trace"], "analyze.x step 1 (limit)");
    }

    #[tokio::test]
    async fn ecg_rhythm_pipeline_parses_oracle_report() {
        let (_dir, store) = fixture_corpus();
        let oracle = CannedOracle::ok(
            "RHYTHM: Atrial Fibrillation\nR-R INTERVALS: Irregularly Irregular\n\
             P WAVES: Absent\nBASELINE: Fibrillatory\nCONFIDENCE: High",
        );
        let sb = sandbox(store, oracle.clone());
        let report = sb
            .run(
                "rhythm check",
                r#"{ "analyze": { "rhythm": {
                    "source": { "from": "patient", "patient_id": "p1" },
                    "steps": [ { "op": "ecg_rhythm", "clinical_context": "HTN" } ]
                } } }"#,
                10,
            )
            .await;
        let row = &report["result"]["rhythm"][0];
        assert_eq!(row["afib_detected"], true);
        assert_eq!(row["ecg_available"], true);
        let prompts = oracle.prompts.lock().unwrap();
        assert!(prompts[0].contains("HTN"));
    }

    #[tokio::test]
    async fn ecg_rhythm_without_waveform_is_unavailable() {
        let (_dir, store) = fixture_corpus();
        let sb = sandbox(store, CannedOracle::ok("unused"));
        let report = sb
            .run(
                "rhythm check",
                r#"{ "analyze": { "rhythm": {
                    "source": { "from": "patient", "patient_id": "p3" },
                    "steps": [ { "op": "ecg_rhythm" } ]
                } } }"#,
                10,
            )
            .await;
        let row = &report["result"]["rhythm"][0];
        assert_eq!(row["ecg_available"], false);
        assert_eq!(row["afib_detected"], false);
    }

    #[tokio::test]
    async fn vision_failure_is_row_data_not_program_failure() {
        let (_dir, store) = fixture_corpus();
        let sb = sandbox(store, CannedOracle::failing("model offline"));
        let report = sb
            .run(
                "image read",
                r#"{ "analyze": { "reads": {
                    "source": { "from": "patient", "patient_id": "p1" },
                    "steps": [
                        { "op": "load_ecg" },
                        { "op": "analyze_image", "prompt": "describe" }
                    ]
                } } }"#,
                10,
            )
            .await;
        assert_eq!(report["status"], "success");
        let analysis = report["result"]["reads"][0]["analysis"].as_str().unwrap();
        assert!(analysis.contains("Vision analysis error"));
    }

    #[tokio::test]
    async fn progress_callback_sees_milestones() {
        let (_dir, store) = fixture_corpus();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sb = Sandbox::new(store, CannedOracle::ok("unused"))
            .with_progress(Box::new(move |m| sink.lock().unwrap().push(m.to_string())));
        let _ = sb
            .run(
                "logged run",
                r#"{ "analyze": { "n": {
                    "source": { "from": "patients" },
                    "steps": [ { "op": "count" } ]
                } } }"#,
                5,
            )
            .await;
        let seen = seen.lock().unwrap();
        assert!(seen.iter().any(|m| m.contains("analysis started")));
        assert!(seen.iter().any(|m| m.contains("patient rows")));
    }

    #[tokio::test]
    async fn group_by_field_buckets_rows() {
        let (_dir, store) = fixture_corpus();
        let sb = sandbox(store, CannedOracle::ok("unused"));
        let report = sb
            .run(
                "grouped",
                r#"{ "analyze": { "by_status": {
                    "source": { "from": "patients" },
                    "steps": [
                        { "op": "conditions" },
                        { "op": "group_by_field", "field": "clinical_status" }
                    ]
                } } }"#,
                50,
            )
            .await;
        let groups = report["result"]["by_status"].as_object().unwrap();
        assert!(groups.contains_key("active"));
        assert_eq!(groups["active"].as_array().unwrap().len(), 4);
    }
}
