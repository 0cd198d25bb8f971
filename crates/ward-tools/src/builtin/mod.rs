// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod analysis;
mod clinical;
mod imaging;
mod patients;
mod population;

use std::sync::Arc;

use ward_sandbox::{Sandbox, VisionOracle};
use ward_store::RecordStore;

pub use analysis::RunAnalysisProgramTool;
pub use clinical::{GetPatientConditionsTool, GetPatientMedicationsTool, GetPatientObservationsTool};
pub use imaging::AnalyzeMedicalImagesTool;
pub use patients::{GetDemographicsTool, ListPatientsTool};
pub use population::{
    AnalyzeBatchConditionsTool, AnalyzeBatchMedicationsTool, AnalyzeBatchObservationsTool,
    SearchPatientResourcesTool,
};

use crate::ToolRegistry;

/// The full builtin tool set wired against one store/sandbox/oracle triple.
pub fn builtin_registry(
    store: Arc<RecordStore>,
    sandbox: Arc<Sandbox>,
    oracle: Arc<dyn VisionOracle>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(ListPatientsTool::new(store.clone()));
    registry.register(GetDemographicsTool::new(store.clone()));
    registry.register(GetPatientConditionsTool::new(store.clone()));
    registry.register(GetPatientObservationsTool::new(store.clone()));
    registry.register(GetPatientMedicationsTool::new(store.clone()));
    registry.register(AnalyzeBatchConditionsTool::new(store.clone()));
    registry.register(AnalyzeBatchObservationsTool::new(store.clone()));
    registry.register(AnalyzeBatchMedicationsTool::new(store.clone()));
    registry.register(SearchPatientResourcesTool::new(store));
    registry.register(RunAnalysisProgramTool::new(sandbox));
    registry.register(AnalyzeMedicalImagesTool::new(oracle));
    registry
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
