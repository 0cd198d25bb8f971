// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Scripted chat backend for deterministic, offline tests.
//!
//! Replies are consumed in order; once the script runs out the backend
//! falls back to a fixed text reply so over-long loops fail visibly in
//! assertions rather than panicking.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::{BackendToolCall, ChatBackend, ChatRequest, ChatResponse, LlmError};

/// One scripted reply.
pub enum ScriptedReply {
    /// Plain text content (also used for structured-output turns: the JSON
    /// text the gateway will parse).
    Text(String),
    /// A native tool call with no content.
    ToolCall { name: String, args: Value },
    /// Reasoning-only turn: empty content with a populated thinking channel.
    ThinkingOnly(String),
    /// Fail the call with the given error.
    Fail(fn() -> LlmError),
    /// Full response under test control.
    Raw(ChatResponse),
}

#[derive(Default)]
pub struct ScriptedMockBackend {
    script: Mutex<Vec<ScriptedReply>>,
    /// Reply used once the script is exhausted.  `always_text` sets this and
    /// leaves the script empty so the same text is returned forever.
    fallback: Mutex<Option<String>>,
    /// Every request seen, for post-hoc assertions.
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedMockBackend {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            script: Mutex::new(replies),
            fallback: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Backend that answers every call with the same text.
    pub fn always_text(text: impl Into<String>) -> Self {
        let backend = Self::default();
        *backend.fallback.lock().unwrap() = Some(text.into());
        backend
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls_made(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn fallback_reply(&self) -> ChatResponse {
        let fallback = self.fallback.lock().unwrap();
        ChatResponse {
            content: fallback.clone().unwrap_or_else(|| "{\"done\": true}".to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ChatBackend for ScriptedMockBackend {
    fn name(&self) -> &str {
        "scripted-mock"
    }

    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, LlmError> {
        self.requests.lock().unwrap().push(req);
        let next = {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() { None } else { Some(script.remove(0)) }
        };
        match next {
            None => Ok(self.fallback_reply()),
            Some(ScriptedReply::Text(t)) => Ok(ChatResponse { content: t, ..Default::default() }),
            Some(ScriptedReply::ToolCall { name, args }) => Ok(ChatResponse {
                tool_calls: vec![BackendToolCall { name, arguments: args }],
                ..Default::default()
            }),
            Some(ScriptedReply::ThinkingOnly(t)) => Ok(ChatResponse {
                content: String::new(),
                thinking: Some(t),
                tool_calls: Vec::new(),
            }),
            Some(ScriptedReply::Fail(make)) => Err(make()),
            Some(ScriptedReply::Raw(resp)) => Ok(resp),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
