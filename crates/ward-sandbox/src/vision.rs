// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The narrow vision seam injected into the sandbox, plus the structured
//! ECG rhythm assessment built on top of it.
//!
//! The sandbox never talks to the model gateway directly; it is handed a
//! [`VisionOracle`] at construction.  This keeps the dependency edge
//! pointing one way even though vision primitives conceptually call "back
//! up" into the model layer.

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;

/// Narrow capability: analyze images with the configured vision model.
/// Failures come back as `Err(message)`; the sandbox embeds them into the
/// program output rather than failing the program.
#[async_trait]
pub trait VisionOracle: Send + Sync {
    async fn analyze(&self, prompt: &str, images: Vec<String>) -> Result<String, String>;
}

/// Structured result of an ECG rhythm read.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RhythmAssessment {
    pub patient_id: String,
    pub ecg_available: bool,
    pub rhythm: String,
    pub afib_detected: bool,
    pub rr_intervals: String,
    pub p_waves: String,
    pub baseline: String,
    pub confidence: String,
    pub clinical_significance: String,
    pub raw_analysis: String,
}

impl RhythmAssessment {
    pub fn unavailable(patient_id: &str) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            ecg_available: false,
            rhythm: "Unknown".into(),
            afib_detected: false,
            rr_intervals: "Unknown".into(),
            p_waves: "Unknown".into(),
            baseline: "Unknown".into(),
            confidence: "N/A".into(),
            clinical_significance: "No ECG image available for analysis".into(),
            raw_analysis: String::new(),
        }
    }
}

/// The prompt that forces the vision model into a parseable report shape.
pub fn rhythm_prompt(patient_id: &str, clinical_context: &str) -> String {
    let context = if clinical_context.is_empty() {
        String::new()
    } else {
        format!(" (Clinical context: {clinical_context})")
    };
    format!(
        "Analyze this ECG tracing for patient {patient_id}{context}.\n\n\
         Specifically assess for atrial fibrillation patterns and provide your \
         analysis in this EXACT format:\n\n\
         RHYTHM: [Normal Sinus Rhythm, Atrial Fibrillation, or Other]\n\
         R-R INTERVALS: [Regular, Irregular, or Irregularly Irregular]\n\
         P WAVES: [Present and normal, Absent, or Abnormal]\n\
         BASELINE: [Normal, Fibrillatory, or Other]\n\
         CLINICAL SIGNIFICANCE: [Brief clinical assessment]\n\
         CONFIDENCE: [High, Medium, or Low]\n\n\
         Be precise in your RHYTHM classification. Only state \"Atrial Fibrillation\" \
         if you see irregularly irregular R-R intervals, absent P waves, AND a \
         fibrillatory baseline."
    )
}

/// Parse the model's field-per-line report into a structured assessment.
/// AFib is decided from the RHYTHM field; the classic triad is only the
/// fallback when the rhythm line is inconclusive; keyword matching over
/// the whole text produced too many false positives.
pub fn parse_rhythm_report(patient_id: &str, raw: &str) -> RhythmAssessment {
    let rhythm = extract_field(raw, "RHYTHM");
    let rr_intervals = extract_field(raw, "R-R INTERVALS");
    let p_waves = extract_field(raw, "P WAVES");
    let baseline = extract_field(raw, "BASELINE");
    let clinical_significance = extract_field(raw, "CLINICAL SIGNIFICANCE");
    let confidence = extract_field(raw, "CONFIDENCE");

    let rhythm_lower = rhythm.to_lowercase();
    let afib_detected = if rhythm_lower.contains("atrial fibrillation") || rhythm_lower == "afib" {
        true
    } else if rhythm_lower.contains("normal sinus rhythm") || rhythm_lower == "nsr" {
        false
    } else {
        rr_intervals.to_lowercase().contains("irregularly irregular")
            && p_waves.to_lowercase().contains("absent")
            && baseline.to_lowercase().contains("fibrillatory")
    };

    RhythmAssessment {
        patient_id: patient_id.to_string(),
        ecg_available: true,
        rhythm,
        afib_detected,
        rr_intervals,
        p_waves,
        baseline,
        confidence,
        clinical_significance,
        raw_analysis: raw.to_string(),
    }
}

/// Value after `FIELD:` on its line, or "Unknown".
fn extract_field(text: &str, field: &str) -> String {
    let pattern = format!(r"(?im)^\s*{}:\s*(.+?)\s*$", regex::escape(field));
    Regex::new(&pattern)
        .ok()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
