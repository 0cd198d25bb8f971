// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Waveform and DICOM access.
//!
//! The corpus ships ECG waveforms as base64 PNG blobs in a two-column CSV
//! (`patient_id,png_base64`) and DICOM files whose *filenames* encode the
//! patient: `Given###_Family###_<uuid>.dcm`.  The DICOM headers in this
//! corpus are unreliable (Modality is `OT` across the board, body part is
//! unset), so metadata here is filename-derived; pixel decoding is the
//! vision model's problem, not ours.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use base64::Engine;
use serde::Serialize;
use tracing::warn;
use walkdir::WalkDir;

use crate::extract;
use crate::store::RecordStore;

/// Filename-derived metadata for one DICOM file.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DicomMetadata {
    pub file: String,
    pub patient_given: String,
    pub patient_family: String,
    pub patient_uuid: String,
    /// The corpus tags every file `OT` regardless of the actual modality.
    pub modality: String,
    pub body_part: String,
}

impl RecordStore {
    /// ECG waveform for a patient as a base64 PNG, from the observations
    /// CSV.  Linear scan; the file is read lazily and rows are large, so no
    /// cache is kept.
    pub fn load_ecg(&self, patient_id: &str) -> Option<String> {
        if patient_id.is_empty() {
            return None;
        }
        let file = match std::fs::File::open(&self.ecg_csv) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %self.ecg_csv.display(), "cannot open ECG csv: {e}");
                return None;
            }
        };
        let reader = std::io::BufReader::new(file);
        for line in reader.lines() {
            let line = line.ok()?;
            // Two fixed columns; base64 never contains a comma, so a single
            // split is exact.
            let Some((id, payload)) = line.split_once(',') else { continue };
            if id.trim() == patient_id {
                let payload = payload.trim();
                if payload.is_empty() {
                    return None;
                }
                return Some(payload.to_string());
            }
        }
        None
    }

    /// Every DICOM file under the configured directory, sorted by path.
    pub fn list_dicom_paths(&self) -> Vec<PathBuf> {
        if !self.dicom_dir.is_dir() {
            return Vec::new();
        }
        let mut paths: Vec<PathBuf> = WalkDir::new(&self.dicom_dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| {
                e.path()
                    .extension()
                    .and_then(|x| x.to_str())
                    .map(|x| x.eq_ignore_ascii_case("dcm"))
                    .unwrap_or(false)
            })
            .map(|e| e.into_path())
            .collect();
        paths.sort();
        paths
    }

    /// DICOM files belonging to a patient.  Primary match: the name pattern
    /// from the bundle's Patient resource against the filename; fallback:
    /// the patient uuid appearing in the filename.
    pub fn find_patient_dicoms(&self, patient_id: &str) -> Vec<PathBuf> {
        let all = self.list_dicom_paths();
        if all.is_empty() {
            return Vec::new();
        }

        if let Some(bundle) = self.load_bundle(patient_id) {
            if let Some(demo) = extract::demographics(&bundle) {
                if !demo.given_name.is_empty() && !demo.family_name.is_empty() {
                    let given = demo.given_name.to_lowercase();
                    let family = demo.family_name.to_lowercase();
                    let by_name: Vec<PathBuf> = all
                        .iter()
                        .filter(|p| {
                            let name = filename_lower(p);
                            name.contains(&given) && name.contains(&family)
                        })
                        .cloned()
                        .collect();
                    if !by_name.is_empty() {
                        return by_name;
                    }
                }
            }
        }

        all.into_iter()
            .filter(|p| filename_lower(p).contains(&patient_id.to_lowercase()))
            .collect()
    }

    /// Raw DICOM payload for a patient, base64 encoded for the vision
    /// channel.  `index` selects among the patient's files.
    pub fn load_dicom_base64(&self, patient_id: &str, index: usize) -> Option<String> {
        let files = self.find_patient_dicoms(patient_id);
        let path = files.get(index)?;
        match std::fs::read(path) {
            Ok(bytes) => Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
            Err(e) => {
                warn!(path = %path.display(), "cannot read DICOM file: {e}");
                None
            }
        }
    }

    /// Metadata for a DICOM path, derived from the filename convention.
    pub fn dicom_metadata_for_path(&self, path: &Path) -> DicomMetadata {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let mut parts = stem.splitn(3, '_');
        let given = strip_digits(parts.next().unwrap_or_default());
        let family = strip_digits(parts.next().unwrap_or_default());
        let uuid = parts.next().unwrap_or_default().to_string();
        DicomMetadata {
            file: path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string(),
            patient_given: given,
            patient_family: family,
            patient_uuid: uuid,
            modality: "OT".to_string(),
            body_part: "Unknown".to_string(),
        }
    }
}

fn filename_lower(path: &Path) -> String {
    path.file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_lowercase()
}

fn strip_digits(s: &str) -> String {
    s.chars().filter(|c| !c.is_ascii_digit()).collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
