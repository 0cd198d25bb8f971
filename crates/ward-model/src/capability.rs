// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Model capability registry: static metadata for the local models ward
//! knows how to drive.
//!
//! Every adaptive behaviour in the gateway, the prompt composer and the
//! agent loop keys off this table.  Lookups never fail: unknown models get
//! a conservative default so a freshly pulled model is usable (if slow)
//! without a code change.

use serde::{Deserialize, Serialize};

use crate::ToolSchema;

/// How the model expresses tool selections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStrategy {
    /// The backend returns structured tool-call objects.
    Native,
    /// The model writes a JSON object into its text output; the tool-call
    /// parser recovers it.
    PromptJson,
}

/// Capabilities and tuning for a single model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelCapability {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    /// Model accepts image input.
    pub vision: bool,
    /// Backend-side function calling works for this model.
    pub native_tools: bool,
    pub tool_strategy: ToolStrategy,
    /// Total context window in tokens.
    pub context_window: u32,
    /// Observed fraction of tool calls that come back well-formed.
    pub tool_call_reliability: f32,
    /// Retry budget for transient backend failures.
    pub max_retries_on_failure: u32,
    /// Skip the argument-optimization round trip (worth it only for slow
    /// vision models where an extra inference costs more than it saves).
    pub skip_arg_optimization: bool,
    /// Include worked examples in the prompt-JSON tool-selection block.
    pub needs_tool_examples: bool,
}

#[derive(Debug, Deserialize)]
struct CapabilityFile {
    models: Vec<ModelCapability>,
}

/// Return all entries from the bundled capability table.
pub fn registry() -> Vec<ModelCapability> {
    let yaml = include_str!("../models.yaml");
    let file: CapabilityFile =
        serde_yaml::from_str(yaml).expect("bundled models.yaml must be valid");
    file.models
}

/// Look up the capability record for a model.  Unknown names resolve to
/// [`default_capability`]; this function never fails.
pub fn capability(model_name: &str) -> ModelCapability {
    registry()
        .into_iter()
        .find(|m| m.name == model_name)
        .unwrap_or_else(|| default_capability(model_name))
}

/// Conservative fallback for models not in the table: prompt-JSON selection
/// with examples, no vision, a small window, low assumed reliability.
pub fn default_capability(model_name: &str) -> ModelCapability {
    ModelCapability {
        name: model_name.to_string(),
        display_name: format!("{model_name} (uncatalogued)"),
        description: String::new(),
        vision: false,
        native_tools: false,
        tool_strategy: ToolStrategy::PromptJson,
        context_window: 8192,
        tool_call_reliability: 0.5,
        max_retries_on_failure: 2,
        skip_arg_optimization: false,
        needs_tool_examples: true,
    }
}

// ─── Prompt-JSON protocol blocks ──────────────────────────────────────────────

/// Render the tool catalogue for a prompt: one block per tool with argument
/// names, types, required/optional markers and descriptions pulled from the
/// declarative parameter schema.
pub fn describe_tools(tools: &[ToolSchema]) -> String {
    let mut blocks = Vec::with_capacity(tools.len());
    for tool in tools {
        let mut args_info = String::new();
        if let Some(props) = tool.parameters.get("properties").and_then(|p| p.as_object()) {
            let required: Vec<&str> = tool
                .parameters
                .get("required")
                .and_then(|r| r.as_array())
                .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
                .unwrap_or_default();
            let mut lines = Vec::with_capacity(props.len());
            for (prop, info) in props {
                let marker = if required.contains(&prop.as_str()) {
                    " (required)"
                } else {
                    " (optional)"
                };
                let prop_type = info.get("type").and_then(|t| t.as_str()).unwrap_or("any");
                let prop_desc = info
                    .get("description")
                    .and_then(|d| d.as_str())
                    .unwrap_or("");
                lines.push(format!("    - {prop}: {prop_type}{marker} - {prop_desc}"));
            }
            if !lines.is_empty() {
                args_info = format!("\n  Arguments:\n{}", lines.join("\n"));
            }
        }
        blocks.push(format!("- {}: {}{}", tool.name, tool.description, args_info));
    }
    blocks.join("\n\n")
}

/// The JSON tool-selection protocol appended to the user prompt for models
/// without native function calling.
pub fn tool_selection_block(capability: &ModelCapability, tools: &[ToolSchema]) -> String {
    let descriptions = describe_tools(tools);
    if capability.needs_tool_examples {
        format!(
            "\nBased on the task, select the most appropriate tool to use.\n\n\
             AVAILABLE TOOLS:\n{descriptions}\n\n\
             EXAMPLES:\n\n\
             Example 1 - Searching for patients with conditions:\n\
             Task: \"Find patients with diabetes\"\n\
             Response:\n\
             {{\n    \"reasoning\": \"Need a population search for a diabetes diagnosis\",\n\
             \x20   \"tool_name\": \"analyze_batch_conditions\",\n\
             \x20   \"tool_args\": {{\"patient_limit\": 50, \"condition_filter\": \"diabetes\"}}\n}}\n\n\
             Example 2 - No tool needed:\n\
             Task: \"Summarize the previous findings\"\n\
             Response:\n\
             {{\n    \"reasoning\": \"The collected outputs already answer this\",\n\
             \x20   \"tool_name\": null,\n\
             \x20   \"tool_args\": {{}}\n}}\n\n\
             NOW RESPOND FOR THE CURRENT TASK.\n\
             You MUST respond with a single valid JSON object in this exact format:\n\
             {{\n    \"reasoning\": \"Brief explanation\",\n\
             \x20   \"tool_name\": \"tool_name_or_null\",\n\
             \x20   \"tool_args\": {{\"arg\": \"value\"}}\n}}\n\
             Only output the JSON object, nothing else.\n"
        )
    } else {
        format!(
            "\nBased on the task, select the most appropriate tool to use.\n\n\
             AVAILABLE TOOLS:\n{descriptions}\n\n\
             IMPORTANT: You MUST respond with a single valid JSON object:\n\
             {{\n    \"reasoning\": \"Brief explanation of why you chose this tool\",\n\
             \x20   \"tool_name\": \"exact_tool_name_from_list\",\n\
             \x20   \"tool_args\": {{\"arg1\": \"value1\"}}\n}}\n\n\
             If no tool is needed, use \"tool_name\": null with empty tool_args.\n\
             RULES:\n\
             1. tool_name MUST exactly match one of the available tools or be null\n\
             2. tool_args MUST contain all required parameters for the chosen tool\n\
             3. Only output the JSON object, nothing else\n"
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
