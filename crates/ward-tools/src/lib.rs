// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The tool layer: a closed, schema-carrying tool set over the record
//! corpus, the registry that validates and dispatches, and the emptiness
//! classifier that drives the retry-with-hint path.

pub mod builtin;
mod outcome;
mod registry;
mod tool;

pub use builtin::builtin_registry;
pub use outcome::is_empty_result;
pub use registry::ToolRegistry;
pub use tool::{validate_args, Tool, ToolError, ToolSchema};

// ─── Shared test fixtures ─────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod test_fixtures {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::{json, Map, Value};

    use ward_sandbox::{Sandbox, VisionOracle};
    use ward_store::RecordStore;

    pub fn args(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    fn bundle(id: &str, extra: Vec<Value>) -> Value {
        let mut entries = vec![json!({
            "resource": {
                "resourceType": "Patient",
                "id": id,
                "gender": "female",
                "birthDate": "1962-03-15",
                "name": [{ "given": ["Ada"], "family": "Lively" }]
            }
        })];
        entries.extend(extra.into_iter().map(|r| json!({ "resource": r })));
        json!({ "resourceType": "Bundle", "entry": entries })
    }

    fn condition(name: &str) -> Value {
        json!({
            "resourceType": "Condition",
            "code": { "text": name },
            "clinicalStatus": { "coding": [{ "code": "active" }] }
        })
    }

    /// Three patients: p1 (diabetes + hypertension, glucose lab, an
    /// allergy), p2 (diabetes, metformin), p3 (bare).
    pub fn fixture_store() -> (tempfile::TempDir, Arc<RecordStore>) {
        let dir = tempfile::tempdir().unwrap();
        let write = |id: &str, b: Value| {
            std::fs::write(dir.path().join(format!("{id}.json")), b.to_string()).unwrap();
        };
        write(
            "p1",
            bundle(
                "p1",
                vec![
                    condition("Diabetes mellitus"),
                    condition("Hypertension"),
                    json!({
                        "resourceType": "Observation",
                        "code": { "text": "Glucose" },
                        "valueQuantity": { "value": 110.0, "unit": "mg/dL" },
                        "category": [{ "coding": [{ "code": "laboratory" }] }]
                    }),
                    json!({
                        "resourceType": "AllergyIntolerance",
                        "code": { "text": "Peanut allergy" }
                    }),
                ],
            ),
        );
        write(
            "p2",
            bundle(
                "p2",
                vec![
                    condition("Diabetes mellitus"),
                    json!({
                        "resourceType": "MedicationRequest",
                        "medicationCodeableConcept": { "text": "Metformin 500 MG" },
                        "status": "active"
                    }),
                ],
            ),
        );
        write("p3", bundle("p3", vec![]));
        let store = Arc::new(RecordStore::new(
            dir.path(),
            dir.path().join("observations.csv"),
            dir.path().join("dicom"),
        ));
        (dir, store)
    }

    pub fn fixture_sandbox() -> (tempfile::TempDir, Arc<Sandbox>) {
        let (dir, store) = fixture_store();
        let sandbox = Arc::new(Sandbox::new(store, CannedOracle::ok("canned vision reply")));
        (dir, sandbox)
    }

    pub struct CannedOracle {
        reply: Result<String, String>,
        /// Image counts per call, for batch-size assertions.
        pub image_batches: Mutex<Vec<usize>>,
    }

    impl CannedOracle {
        pub fn ok(reply: &str) -> Arc<Self> {
            Arc::new(Self { reply: Ok(reply.to_string()), image_batches: Mutex::new(Vec::new()) })
        }
        pub fn failing(msg: &str) -> Arc<Self> {
            Arc::new(Self { reply: Err(msg.to_string()), image_batches: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl VisionOracle for CannedOracle {
        async fn analyze(&self, _prompt: &str, images: Vec<String>) -> Result<String, String> {
            self.image_batches.lock().unwrap().push(images.len());
            self.reply.clone()
        }
    }
}
