// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Concurrent fan-out over patient bundles with built-in aggregation.
//!
//! All batch operations are total: a patient whose bundle is missing or
//! unreadable counts as "no bundle" and never fails the batch.  Aggregates
//! are deterministic for a given id ordering: counts sort by frequency
//! descending with name as the tie-break, and per-patient maps are ordered.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::{stream, StreamExt};
use serde::Serialize;
use serde_json::Value;

use crate::extract::{self, Condition, Medication, Observation};
use crate::store::RecordStore;

/// Worker-pool width for bundle loading.
const BATCH_WORKERS: usize = 8;

/// One `(name, count)` aggregate entry.  Serialized as an object so the
/// frequency ordering survives the trip through JSON.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CountEntry {
    pub name: String,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct NumericStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub sum: f64,
}

#[derive(Debug, Serialize)]
pub struct ConditionBatch {
    pub patients_analyzed: usize,
    pub patients_with_matches: usize,
    pub condition_counts: Vec<CountEntry>,
    pub patient_conditions: BTreeMap<String, Vec<Condition>>,
}

#[derive(Debug, Serialize)]
pub struct ObservationBatch {
    pub patients_analyzed: usize,
    pub patients_with_data: usize,
    pub observation_counts: Vec<CountEntry>,
    pub numeric_stats: BTreeMap<String, NumericStats>,
    pub patient_observations: BTreeMap<String, Vec<Observation>>,
}

#[derive(Debug, Serialize)]
pub struct MedicationBatch {
    pub patients_analyzed: usize,
    pub patients_with_medications: usize,
    pub medication_counts: Vec<CountEntry>,
    pub patient_medications: BTreeMap<String, Vec<Medication>>,
}

#[derive(Debug, Serialize)]
pub struct ResourceBatch {
    pub resource_type: String,
    pub patients_searched: usize,
    pub patients_with_results: usize,
    pub total_resources_found: usize,
    pub results: BTreeMap<String, Vec<Value>>,
}

/// Load many bundles concurrently through a bounded worker pool.
/// The result keys equal the input id set; missing bundles map to `None`.
pub async fn load_patients_batch(
    store: &Arc<RecordStore>,
    patient_ids: &[String],
) -> BTreeMap<String, Option<Arc<Value>>> {
    let loads = stream::iter(patient_ids.iter().cloned().map(|pid| {
        let store = store.clone();
        async move {
            let bundle = tokio::task::spawn_blocking({
                let store = store.clone();
                let pid = pid.clone();
                move || store.load_bundle(&pid)
            })
            .await
            .ok()
            .flatten();
            (pid, bundle)
        }
    }))
    .buffer_unordered(BATCH_WORKERS)
    .collect::<Vec<_>>()
    .await;

    loads.into_iter().collect()
}

pub async fn batch_conditions(
    store: &Arc<RecordStore>,
    patient_ids: &[String],
    condition_filter: Option<&str>,
) -> ConditionBatch {
    let bundles = load_patients_batch(store, patient_ids).await;

    let mut counts: BTreeMap<String, u32> = BTreeMap::new();
    let mut patient_conditions: BTreeMap<String, Vec<Condition>> = BTreeMap::new();

    for (pid, bundle) in &bundles {
        let Some(bundle) = bundle else { continue };
        let mut conditions = extract::conditions(bundle);
        if let Some(filter) = condition_filter {
            let needle = filter.to_lowercase();
            conditions.retain(|c| c.name.to_lowercase().contains(&needle));
        }
        if conditions.is_empty() {
            continue;
        }
        for cond in &conditions {
            *counts.entry(display_name(&cond.name)).or_default() += 1;
        }
        patient_conditions.insert(pid.clone(), conditions);
    }

    ConditionBatch {
        patients_analyzed: patient_ids.len(),
        patients_with_matches: patient_conditions.len(),
        condition_counts: sorted_counts(counts),
        patient_conditions,
    }
}

pub async fn batch_observations(
    store: &Arc<RecordStore>,
    patient_ids: &[String],
    category: Option<&str>,
    code_filter: Option<&str>,
) -> ObservationBatch {
    let bundles = load_patients_batch(store, patient_ids).await;

    let mut counts: BTreeMap<String, u32> = BTreeMap::new();
    let mut numeric_values: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut patient_observations: BTreeMap<String, Vec<Observation>> = BTreeMap::new();

    for (pid, bundle) in &bundles {
        let Some(bundle) = bundle else { continue };
        let mut observations = extract::observations(bundle);
        if let Some(cat) = category {
            let cat = cat.to_lowercase();
            observations.retain(|o| o.category.iter().any(|c| c.to_lowercase() == cat));
        }
        if let Some(filter) = code_filter {
            let needle = filter.to_lowercase();
            observations.retain(|o| o.code.to_lowercase().contains(&needle));
        }
        if observations.is_empty() {
            continue;
        }
        for obs in &observations {
            *counts.entry(obs.code.clone()).or_default() += 1;
            if let Some(n) = obs.value.as_ref().and_then(|v| v.as_number()) {
                numeric_values.entry(obs.code.clone()).or_default().push(n);
            }
        }
        patient_observations.insert(pid.clone(), observations);
    }

    let numeric_stats = numeric_values
        .into_iter()
        .map(|(code, values)| (code, numeric_stats(&values)))
        .collect();

    ObservationBatch {
        patients_analyzed: patient_ids.len(),
        patients_with_data: patient_observations.len(),
        observation_counts: sorted_counts(counts),
        numeric_stats,
        patient_observations,
    }
}

pub async fn batch_medications(
    store: &Arc<RecordStore>,
    patient_ids: &[String],
    medication_filter: Option<&str>,
) -> MedicationBatch {
    let bundles = load_patients_batch(store, patient_ids).await;

    let mut counts: BTreeMap<String, u32> = BTreeMap::new();
    let mut patient_medications: BTreeMap<String, Vec<Medication>> = BTreeMap::new();

    for (pid, bundle) in &bundles {
        let Some(bundle) = bundle else { continue };
        let mut medications = extract::medications(bundle);
        if let Some(filter) = medication_filter {
            let needle = filter.to_lowercase();
            medications.retain(|m| m.medication.to_lowercase().contains(&needle));
        }
        if medications.is_empty() {
            continue;
        }
        for med in &medications {
            *counts.entry(display_name(&med.medication)).or_default() += 1;
        }
        patient_medications.insert(pid.clone(), medications);
    }

    MedicationBatch {
        patients_analyzed: patient_ids.len(),
        patients_with_medications: patient_medications.len(),
        medication_counts: sorted_counts(counts),
        patient_medications,
    }
}

pub async fn batch_resources(
    store: &Arc<RecordStore>,
    patient_ids: &[String],
    resource_type: &str,
    text_filter: Option<&str>,
) -> ResourceBatch {
    let bundles = load_patients_batch(store, patient_ids).await;

    let mut results: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    let mut total = 0usize;

    for (pid, bundle) in &bundles {
        let Some(bundle) = bundle else { continue };
        let mut resources = extract::resources_of_type(bundle, resource_type);
        if let Some(filter) = text_filter {
            let needle = filter.to_lowercase();
            resources.retain(|r| resource_matches_text(r, &needle));
        }
        if resources.is_empty() {
            continue;
        }
        total += resources.len();
        results.insert(pid.clone(), resources);
    }

    ResourceBatch {
        resource_type: resource_type.to_string(),
        patients_searched: patient_ids.len(),
        patients_with_results: results.len(),
        total_resources_found: total,
        results,
    }
}

/// Text match against the common codeable fields of an arbitrary resource.
fn resource_matches_text(resource: &Value, needle_lower: &str) -> bool {
    for field in ["code", "medicationCodeableConcept", "substance"] {
        let obj = &resource[field];
        if let Some(text) = obj["text"].as_str() {
            if text.to_lowercase().contains(needle_lower) {
                return true;
            }
        }
        if let Some(codings) = obj["coding"].as_array() {
            for coding in codings {
                if let Some(display) = coding["display"].as_str() {
                    if display.to_lowercase().contains(needle_lower) {
                        return true;
                    }
                }
            }
        }
    }
    false
}

fn display_name(name: &str) -> String {
    if name.is_empty() {
        "Unknown".to_string()
    } else {
        name.to_string()
    }
}

/// Frequency-descending count list; names break ties so the ordering is
/// stable across runs.
fn sorted_counts(counts: BTreeMap<String, u32>) -> Vec<CountEntry> {
    let mut entries: Vec<CountEntry> = counts
        .into_iter()
        .map(|(name, count)| CountEntry { name, count })
        .collect();
    entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    entries
}

/// Stats over a numeric series; zeroed when empty.
pub fn numeric_stats(values: &[f64]) -> NumericStats {
    if values.is_empty() {
        return NumericStats { count: 0, min: 0.0, max: 0.0, mean: 0.0, sum: 0.0 };
    }
    let sum: f64 = values.iter().sum();
    NumericStats {
        count: values.len(),
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        mean: sum / values.len() as f64,
        sum,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_fixtures::{
        bundle_with, condition_resource, observation_resource, write_bundle,
    };

    fn fixture_store() -> (tempfile::TempDir, Arc<RecordStore>) {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(
            dir.path(),
            "p1",
            bundle_with(
                "p1",
                vec![
                    condition_resource("Diabetes mellitus", "active"),
                    condition_resource("Hypertension", "active"),
                    observation_resource("Glucose", 110.0, "mg/dL", "laboratory"),
                ],
            ),
        );
        write_bundle(
            dir.path(),
            "p2",
            bundle_with(
                "p2",
                vec![
                    condition_resource("Diabetes mellitus", "active"),
                    observation_resource("Glucose", 90.0, "mg/dL", "laboratory"),
                    observation_resource("Heart rate", 72.0, "bpm", "vital-signs"),
                ],
            ),
        );
        write_bundle(dir.path(), "p3", bundle_with("p3", vec![]));
        let store = Arc::new(RecordStore::new(
            dir.path(),
            dir.path().join("observations.csv"),
            dir.path().join("dicom"),
        ));
        (dir, store)
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn load_batch_preserves_id_association() {
        let (_dir, store) = fixture_store();
        let bundles = load_patients_batch(&store, &ids(&["p1", "p2", "missing"])).await;
        assert_eq!(bundles.len(), 3);
        assert!(bundles["p1"].is_some());
        assert!(bundles["p2"].is_some());
        assert!(bundles["missing"].is_none());
    }

    #[tokio::test]
    async fn load_batch_keys_equal_input_set() {
        let (_dir, store) = fixture_store();
        let input = ids(&["p2", "p1"]);
        let bundles = load_patients_batch(&store, &input).await;
        let mut keys: Vec<&String> = bundles.keys().collect();
        keys.sort();
        assert_eq!(keys, vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn batch_conditions_counts_and_filters() {
        let (_dir, store) = fixture_store();
        let report = batch_conditions(&store, &ids(&["p1", "p2", "p3"]), Some("diabetes")).await;
        assert_eq!(report.patients_analyzed, 3);
        assert_eq!(report.patients_with_matches, 2);
        assert_eq!(report.condition_counts.len(), 1);
        assert_eq!(report.condition_counts[0].name, "Diabetes mellitus");
        assert_eq!(report.condition_counts[0].count, 2);
        assert!(report.patient_conditions.contains_key("p1"));
        assert!(!report.patient_conditions.contains_key("p3"));
    }

    #[tokio::test]
    async fn batch_conditions_unfiltered_sorts_by_frequency() {
        let (_dir, store) = fixture_store();
        let report = batch_conditions(&store, &ids(&["p1", "p2"]), None).await;
        assert_eq!(report.condition_counts[0].name, "Diabetes mellitus");
        assert_eq!(report.condition_counts[0].count, 2);
        assert_eq!(report.condition_counts[1].name, "Hypertension");
    }

    #[tokio::test]
    async fn batch_conditions_rerun_is_deterministic() {
        let (_dir, store) = fixture_store();
        let a = batch_conditions(&store, &ids(&["p1", "p2", "p3"]), None).await;
        let b = batch_conditions(&store, &ids(&["p1", "p2", "p3"]), None).await;
        assert_eq!(a.condition_counts, b.condition_counts);
        assert_eq!(a.patients_with_matches, b.patients_with_matches);
    }

    #[tokio::test]
    async fn batch_observations_aggregates_numeric_stats() {
        let (_dir, store) = fixture_store();
        let report =
            batch_observations(&store, &ids(&["p1", "p2"]), Some("laboratory"), Some("glucose"))
                .await;
        assert_eq!(report.patients_with_data, 2);
        let stats = &report.numeric_stats["Glucose"];
        assert_eq!(stats.count, 2);
        assert_eq!(stats.min, 90.0);
        assert_eq!(stats.max, 110.0);
        assert_eq!(stats.mean, 100.0);
        assert_eq!(stats.sum, 200.0);
    }

    #[tokio::test]
    async fn batch_observations_category_filter_excludes_vitals() {
        let (_dir, store) = fixture_store();
        let report = batch_observations(&store, &ids(&["p2"]), Some("laboratory"), None).await;
        let obs = &report.patient_observations["p2"];
        assert!(obs.iter().all(|o| o.category.contains(&"laboratory".to_string())));
    }

    #[tokio::test]
    async fn batch_medications_empty_corpus_is_total() {
        let (_dir, store) = fixture_store();
        let report = batch_medications(&store, &ids(&["p1", "missing"]), None).await;
        assert_eq!(report.patients_analyzed, 2);
        assert_eq!(report.patients_with_medications, 0);
        assert!(report.medication_counts.is_empty());
    }

    #[tokio::test]
    async fn batch_resources_finds_untooled_types() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(
            dir.path(),
            "p9",
            bundle_with(
                "p9",
                vec![json!({
                    "resourceType": "AllergyIntolerance",
                    "code": { "text": "Peanut allergy" }
                })],
            ),
        );
        let store = Arc::new(RecordStore::new(
            dir.path(),
            dir.path().join("x.csv"),
            dir.path().join("d"),
        ));
        let report =
            batch_resources(&store, &ids(&["p9"]), "AllergyIntolerance", Some("peanut")).await;
        assert_eq!(report.patients_with_results, 1);
        assert_eq!(report.total_resources_found, 1);
        let misses = batch_resources(&store, &ids(&["p9"]), "AllergyIntolerance", Some("latex")).await;
        assert_eq!(misses.patients_with_results, 0);
    }

    #[test]
    fn sorted_counts_breaks_ties_by_name() {
        let mut counts = BTreeMap::new();
        counts.insert("b".to_string(), 2u32);
        counts.insert("a".to_string(), 2u32);
        counts.insert("c".to_string(), 5u32);
        let sorted = sorted_counts(counts);
        assert_eq!(sorted[0].name, "c");
        assert_eq!(sorted[1].name, "a");
        assert_eq!(sorted[2].name, "b");
    }

    #[test]
    fn stats_of_empty_is_zeroed() {
        let stats = numeric_stats(&[]);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.sum, 0.0);
    }
}
