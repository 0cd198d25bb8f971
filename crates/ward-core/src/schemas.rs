// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Structured-output contracts: the types the model's JSON replies must
//! deserialize into, and the JSON Schemas sent as the backend `format`
//! field to force that shape.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// One unit of planned work.  `done` is monotonic: the loop only ever sets
/// it, never clears it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: u32,
    pub description: String,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskList {
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct IsDone {
    pub done: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptimizedArgs {
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Answer {
    pub answer: String,
}

pub fn task_list_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "tasks": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "integer" },
                        "description": { "type": "string" },
                        "done": { "type": "boolean" }
                    },
                    "required": ["id", "description"]
                }
            }
        },
        "required": ["tasks"]
    })
}

pub fn is_done_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "done": { "type": "boolean" } },
        "required": ["done"]
    })
}

pub fn optimized_args_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "arguments": { "type": "object" } },
        "required": ["arguments"]
    })
}

pub fn answer_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "answer": { "type": "string" } },
        "required": ["answer"]
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
