// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a backend chat request.
///
/// Images ride alongside the text as base64 PNG payloads, matching the
/// Ollama chat wire format (`message.images`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, content: text.into(), images: Vec::new() }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: text.into(), images: Vec::new() }
    }

    pub fn user_with_images(text: impl Into<String>, images: Vec<String>) -> Self {
        Self { role: Role::User, content: text.into(), images }
    }

    /// Approximate token count used for context accounting (4 chars ≈ 1
    /// token; images use a flat conservative estimate).
    pub fn approx_tokens(&self) -> usize {
        let image_tokens = self.images.len() * 765;
        (self.content.len() / 4).max(1) + image_tokens
    }
}

/// A tool schema provided to the model, also the source for the prompt
/// catalogue and for dispatch validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: Value,
}

// ─── Backend request/response ─────────────────────────────────────────────────

/// Request sent to a chat backend.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSchema>,
    /// JSON Schema the reply content must conform to (structured-output
    /// mode).  `None` for free-form replies.
    pub format: Option<Value>,
    pub temperature: f32,
}

/// A tool call returned natively by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendToolCall {
    pub name: String,
    pub arguments: Value,
}

/// Normalised backend reply.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    /// Reasoning emitted in a separate channel by some model servers.
    pub thinking: Option<String>,
    pub tool_calls: Vec<BackendToolCall>,
}

// ─── Errors ───────────────────────────────────────────────────────────────────

/// The error taxonomy every model-facing call resolves to.  The agent loop
/// branches on these explicitly; none of them is allowed to escape it.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Connection-level failure worth retrying (server restart, timeout,
    /// 5xx).
    #[error("transient backend failure: {0}")]
    Transient(String),
    /// The model replied, but not in the shape we asked for.  Counted
    /// against the agent-error budget, never raised.
    #[error("agent error: {0}")]
    Agent(String),
    /// Misconfiguration or a 4xx the backend will keep returning.
    #[error("fatal backend failure: {0}")]
    Fatal(String),
    /// The session token was cancelled while the call was in flight.
    #[error("cancelled")]
    Cancelled,
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Transient(_))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
