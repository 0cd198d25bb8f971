// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Model-facing layer: capability registry, chat backend seam, the LLM
//! gateway, and the tool-call parser for prompt-JSON models.

pub mod capability;
mod backend;
mod gateway;
mod mock;
mod parser;
mod types;

pub use backend::{ChatBackend, OllamaBackend};
pub use capability::{capability, default_capability, registry, ModelCapability, ToolStrategy};
pub use gateway::{ActionReply, LlmGateway, ToolInvocation};
pub use mock::{ScriptedMockBackend, ScriptedReply};
pub use parser::{parse_tool_call, synthetic_call_id, ParsedToolCall};
pub use types::{
    BackendToolCall, ChatMessage, ChatRequest, ChatResponse, LlmError, Role, ToolSchema,
};
