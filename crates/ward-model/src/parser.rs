// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool-call parser for models without native function calling.
//!
//! Prompt-JSON models answer the action prompt with free-form text that is
//! supposed to contain a single JSON object:
//!
//! ```json
//! { "reasoning": "…", "tool_name": "list_patients", "tool_args": { "limit": 3 } }
//! ```
//!
//! In practice the object arrives wrapped in markdown fences, prefixed with
//! prose, or both.  Extraction is ordered, first parse wins:
//!
//! 1. a ```json fenced block
//! 2. any ``` fenced block
//! 3. the first balanced `{…}` substring
//!
//! A parse succeeds iff the object carries a `tool_name` key.  A `null`
//! tool_name is a valid result and means "the task is complete without
//! further tool use".

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// A tool invocation recovered from model text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    /// `None` means the model explicitly selected no tool.
    pub tool_name: Option<String>,
    pub tool_args: Map<String, Value>,
    pub reasoning: String,
    /// Synthetic id minted from the tool name so downstream protocols that
    /// expect one always get one.
    pub call_id: String,
}

/// Extract a tool call from free-form model text.  Returns `None` when the
/// text contains no parseable object with a `tool_name` key.
pub fn parse_tool_call(text: &str) -> Option<ParsedToolCall> {
    for candidate in candidates(text) {
        if let Some(call) = try_parse(&candidate) {
            return Some(call);
        }
    }
    None
}

/// Deterministic synthetic call id: a stable function of the tool name, so
/// repeated parses of the same call produce the same id.
pub fn synthetic_call_id(tool_name: Option<&str>) -> String {
    let name = tool_name.unwrap_or("none");
    let digest = Sha256::digest(name.as_bytes());
    format!("call_{}", &hex::encode(digest)[..12])
}

/// Candidate JSON fragments in priority order.
fn candidates(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(block) = fenced_block(text, "```json") {
        out.push(block);
    }
    if let Some(block) = fenced_block(text, "```") {
        out.push(block);
    }
    if let Some(obj) = first_balanced_object(text) {
        out.push(obj);
    }
    out
}

/// Content of the first fence opened by `opener`, if it is closed.
fn fenced_block(text: &str, opener: &str) -> Option<String> {
    let start = text.find(opener)? + opener.len();
    let rest = &text[start..];
    // Skip to the end of the opener line so "```json" does not leave "json"
    // in the candidate when matched by the bare "```" opener.
    let rest = match rest.find('\n') {
        Some(nl) if opener == "```" && !rest[..nl].trim().is_empty() => &rest[nl + 1..],
        _ => rest,
    };
    let end = rest.find("```")?;
    Some(rest[..end].trim().to_string())
}

/// First balanced `{…}` substring, honouring strings and escapes.
fn first_balanced_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..=i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn try_parse(candidate: &str) -> Option<ParsedToolCall> {
    let value: Value = serde_json::from_str(candidate).ok()?;
    let obj = value.as_object()?;
    // The discriminating key: without it this is just some JSON the model
    // happened to emit, not a tool selection.
    let tool_name = match obj.get("tool_name")? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        _ => return None,
    };
    let tool_args = match obj.get("tool_args") {
        Some(Value::Object(m)) => m.clone(),
        _ => Map::new(),
    };
    let reasoning = obj
        .get("reasoning")
        .and_then(|r| r.as_str())
        .unwrap_or_default()
        .to_string();
    let call_id = synthetic_call_id(tool_name.as_deref());
    Some(ParsedToolCall { tool_name, tool_args, reasoning, call_id })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
