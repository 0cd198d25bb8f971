// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Failure modes of a tool dispatch.  All of them render as strings into
/// the tool-output history; none of them stops the agent loop.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Runtime(String),
}

/// A tool schema; mirrors the model crate's schema type but keeps this
/// crate independent from it.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Trait every builtin tool implements.  The declarative parameter schema
/// is used in three places: the prompt catalogue, argument optimization,
/// and dispatch validation.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema of the argument object, with per-property descriptions.
    fn parameters_schema(&self) -> Value;
    /// Execute with validated arguments.  Runtime failures come back as
    /// [`ToolError::Runtime`]; results must be JSON so they can be
    /// re-embedded in later prompts.
    async fn execute(&self, args: &Map<String, Value>) -> Result<Value, ToolError>;
}

/// Validate `args` against a declarative parameter schema: every required
/// property present, every provided property type-compatible.  Unknown
/// extra arguments pass through; models pad calls with harmless extras
/// and rejecting them wastes a step.
pub fn validate_args(schema: &Value, args: &Map<String, Value>) -> Result<(), ToolError> {
    let empty = Map::new();
    let props = schema["properties"].as_object().unwrap_or(&empty);

    if let Some(required) = schema["required"].as_array() {
        for name in required.iter().filter_map(|v| v.as_str()) {
            if !args.contains_key(name) {
                return Err(ToolError::InvalidArguments(format!(
                    "missing required argument \"{name}\""
                )));
            }
        }
    }

    for (name, value) in args {
        let Some(spec) = props.get(name) else { continue };
        let Some(expected) = spec["type"].as_str() else { continue };
        if !type_matches(expected, value) {
            return Err(ToolError::InvalidArguments(format!(
                "argument \"{name}\" should be {expected}, got {}",
                json_type(value)
            )));
        }
    }
    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─── Argument accessors ───────────────────────────────────────────────────────
// Small helpers the builtins share; models send integers as floats often
// enough that the numeric accessor accepts both.

pub(crate) fn arg_str<'a>(args: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    args.get(name).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

pub(crate) fn require_str<'a>(
    args: &'a Map<String, Value>,
    name: &str,
) -> Result<&'a str, ToolError> {
    arg_str(args, name)
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing required argument \"{name}\"")))
}

pub(crate) fn arg_usize(args: &Map<String, Value>, name: &str) -> Option<usize> {
    args.get(name).and_then(|v| {
        v.as_u64()
            .map(|n| n as usize)
            .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as usize))
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
