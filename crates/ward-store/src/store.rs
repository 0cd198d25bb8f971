// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Read-only access to the record corpus: a directory of per-patient JSON
//! bundles.  Bundles and the id list are cached after first load; the
//! corpus never changes under a running session.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub struct RecordStore {
    records_dir: PathBuf,
    pub(crate) ecg_csv: PathBuf,
    pub(crate) dicom_dir: PathBuf,
    bundle_cache: Mutex<HashMap<String, Arc<Value>>>,
    id_list_cache: Mutex<Option<Arc<Vec<String>>>>,
}

impl RecordStore {
    pub fn new(
        records_dir: impl Into<PathBuf>,
        ecg_csv: impl Into<PathBuf>,
        dicom_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            records_dir: records_dir.into(),
            ecg_csv: ecg_csv.into(),
            dicom_dir: dicom_dir.into(),
            bundle_cache: Mutex::new(HashMap::new()),
            id_list_cache: Mutex::new(None),
        }
    }

    /// Load a patient's bundle.  Lookup order: `<id>.json` directly under the
    /// records dir, then any `*.json` whose filename contains the id.
    /// Returns `None` for unknown ids and for unreadable files; batch
    /// callers rely on this being total.
    pub fn load_bundle(&self, patient_id: &str) -> Option<Arc<Value>> {
        if patient_id.is_empty() {
            return None;
        }
        if let Some(bundle) = self.bundle_cache.lock().unwrap().get(patient_id) {
            return Some(bundle.clone());
        }

        let direct = self.records_dir.join(format!("{patient_id}.json"));
        let path = if direct.is_file() {
            Some(direct)
        } else {
            self.scan_for_filename_containing(patient_id)
        }?;

        match self.read_json(&path) {
            Ok(bundle) => {
                let bundle = Arc::new(bundle);
                self.bundle_cache
                    .lock()
                    .unwrap()
                    .insert(patient_id.to_string(), bundle.clone());
                Some(bundle)
            }
            Err(e) => {
                warn!(patient_id, "failed to load bundle: {e}");
                None
            }
        }
    }

    /// List patient ids.  Prefers the id of the `Patient` resource inside
    /// each bundle; falls back to the file stem when the bundle has none or
    /// does not parse.  The full list is cached after the first scan.
    pub fn list_ids(&self, limit: Option<usize>) -> Vec<String> {
        let ids = {
            let mut cache = self.id_list_cache.lock().unwrap();
            match cache.as_ref() {
                Some(ids) => ids.clone(),
                None => {
                    let ids = Arc::new(self.scan_ids());
                    *cache = Some(ids.clone());
                    ids
                }
            }
        };
        match limit {
            Some(n) => ids.iter().take(n).cloned().collect(),
            None => ids.as_ref().clone(),
        }
    }

    fn scan_ids(&self) -> Vec<String> {
        if !self.records_dir.is_dir() {
            warn!(dir = %self.records_dir.display(), "records directory does not exist");
            return Vec::new();
        }
        let mut ids = Vec::new();
        for entry in WalkDir::new(&self.records_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            match self.read_json(path) {
                Ok(bundle) => ids.push(patient_resource_id(&bundle).unwrap_or(stem)),
                Err(_) => ids.push(stem),
            }
        }
        debug!(count = ids.len(), "scanned patient id list");
        ids
    }

    fn scan_for_filename_containing(&self, needle: &str) -> Option<PathBuf> {
        if !self.records_dir.is_dir() {
            return None;
        }
        WalkDir::new(&self.records_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .find(|e| {
                e.path().extension().and_then(|x| x.to_str()) == Some("json")
                    && e.file_name().to_string_lossy().contains(needle)
            })
            .map(|e| e.into_path())
    }

    pub(crate) fn read_json(&self, path: &std::path::Path) -> Result<Value, StoreError> {
        let text = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| StoreError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Id of the `Patient` resource inside a bundle, if present.
pub fn patient_resource_id(bundle: &Value) -> Option<String> {
    bundle["entry"].as_array()?.iter().find_map(|entry| {
        let resource = &entry["resource"];
        if resource["resourceType"].as_str() == Some("Patient") {
            resource["id"].as_str().map(str::to_string)
        } else {
            None
        }
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_fixtures::{bundle_with, write_bundle};

    fn store_in(dir: &std::path::Path) -> RecordStore {
        RecordStore::new(dir, dir.join("observations.csv"), dir.join("dicom"))
    }

    #[test]
    fn load_bundle_by_direct_filename() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path(), "p1", bundle_with("p1", vec![]));
        let store = store_in(dir.path());
        let bundle = store.load_bundle("p1").unwrap();
        assert_eq!(patient_resource_id(&bundle).as_deref(), Some("p1"));
    }

    #[test]
    fn load_bundle_by_substring_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Abe123_Smith456_p2.json"),
            bundle_with("p2", vec![]).to_string(),
        )
        .unwrap();
        let store = store_in(dir.path());
        assert!(store.load_bundle("p2").is_some());
    }

    #[test]
    fn load_bundle_unknown_id_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(store.load_bundle("nope").is_none());
    }

    #[test]
    fn load_bundle_empty_id_is_none() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path(), "p1", bundle_with("p1", vec![]));
        let store = store_in(dir.path());
        assert!(store.load_bundle("").is_none());
    }

    #[test]
    fn load_bundle_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path(), "p1", bundle_with("p1", vec![]));
        let store = store_in(dir.path());
        let first = store.load_bundle("p1").unwrap();
        // Delete the file; the cached copy must still be served.
        std::fs::remove_file(dir.path().join("p1.json")).unwrap();
        let second = store.load_bundle("p1").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn list_ids_prefers_patient_resource_id() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("weird-filename.json"),
            bundle_with("real-id", vec![]).to_string(),
        )
        .unwrap();
        let store = store_in(dir.path());
        assert_eq!(store.list_ids(None), vec!["real-id"]);
    }

    #[test]
    fn list_ids_falls_back_to_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stem-id.json"), json!({"no": "entries"}).to_string())
            .unwrap();
        let store = store_in(dir.path());
        assert_eq!(store.list_ids(None), vec!["stem-id"]);
    }

    #[test]
    fn list_ids_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            write_bundle(dir.path(), &format!("p{i}"), bundle_with(&format!("p{i}"), vec![]));
        }
        let store = store_in(dir.path());
        assert_eq!(store.list_ids(Some(2)).len(), 2);
        assert_eq!(store.list_ids(None).len(), 5);
    }

    #[test]
    fn list_ids_missing_dir_is_empty() {
        let store = RecordStore::new("/nonexistent/ward-test", "/tmp/x.csv", "/tmp/d");
        assert!(store.list_ids(None).is_empty());
    }

    #[test]
    fn list_ids_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        for id in ["b", "a", "c"] {
            write_bundle(dir.path(), id, bundle_with(id, vec![]));
        }
        let store = store_in(dir.path());
        let first = store.list_ids(None);
        assert_eq!(first, store.list_ids(None));
        assert_eq!(first, vec!["a", "b", "c"]);
    }
}
