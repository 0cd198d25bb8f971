// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool-result emptiness classification.
//!
//! A tool can succeed and still bring back nothing; the retry-with-hint
//! path keys off this classifier, so it has to be pure and total over any
//! JSON value.

use serde_json::Value;

/// Phrases whose presence marks a string result as empty.
///
/// Deliberately dumb substring matching, kept from the original behaviour:
/// clinical prose that merely *mentions* "not found" ("metastasis not
/// found") classifies as empty and costs one wasted retry.  The simplicity
/// is worth that: a false "empty" triggers a broadened retry, never data
/// loss.
const NO_DATA_PHRASES: &[&str] = &[
    "no data",
    "no results",
    "not found",
    "empty",
    "no patients",
    "0 results",
    "could not find",
    "unable to find",
];

/// Collection keys that, when present and empty, mark a mapping as empty.
const COLLECTION_KEYS: &[&str] = &["patients", "results", "conditions"];

/// Counter keys that, when zero, mark a mapping as empty.
const ZERO_KEYS: &[&str] = &["total_patients", "count"];

/// Classify a tool result as usable (`false`) or no-data (`true`).
pub fn is_empty_result(result: &Value) -> bool {
    match result {
        Value::Null => true,
        Value::String(s) => {
            let lower = s.to_lowercase();
            NO_DATA_PHRASES.iter().any(|phrase| lower.contains(phrase))
        }
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => {
            for key in COLLECTION_KEYS {
                match map.get(*key) {
                    Some(Value::Array(items)) if items.is_empty() => return true,
                    Some(Value::Object(inner)) if inner.is_empty() => return true,
                    _ => {}
                }
            }
            for key in ZERO_KEYS {
                if let Some(value) = map.get(*key) {
                    if value.as_u64() == Some(0) {
                        return true;
                    }
                }
            }
            false
        }
        Value::Bool(_) | Value::Number(_) => false,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
