// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Read-only record corpus access: per-patient JSON bundles, FHIR-shaped
//! extraction, concurrent batch aggregation, and waveform/DICOM payloads.

pub mod batch;
pub mod extract;
mod imaging;
mod store;

pub use batch::{
    batch_conditions, batch_medications, batch_observations, batch_resources,
    load_patients_batch, ConditionBatch, CountEntry, MedicationBatch, NumericStats,
    ObservationBatch, ResourceBatch,
};
pub use extract::{Condition, Demographics, Medication, Observation, ObservationValue};
pub use imaging::DicomMetadata;
pub use store::{patient_resource_id, RecordStore, StoreError};

// ─── Shared test fixtures ─────────────────────────────────────────────────────
