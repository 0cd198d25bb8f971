// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Chat backend seam and the Ollama-compatible production implementation.
//!
//! The gateway only ever talks to a [`ChatBackend`]; tests substitute
//! [`crate::ScriptedMockBackend`] so every agent scenario runs offline.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{BackendToolCall, ChatRequest, ChatResponse, LlmError, Role};

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Backend identifier for status display.
    fn name(&self) -> &str;

    /// Send one non-streaming chat request and return the normalised reply.
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, LlmError>;
}

/// Client for an Ollama-style `/api/chat` endpoint.
pub struct OllamaBackend {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        let base = base_url.into();
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self { base_url: base.trim_end_matches('/').to_string(), client }
    }

    fn build_body(req: &ChatRequest) -> Value {
        let messages: Vec<Value> = req
            .messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                let mut msg = json!({ "role": role, "content": m.content });
                if !m.images.is_empty() {
                    msg["images"] = json!(m.images);
                }
                msg
            })
            .collect();

        let mut body = json!({
            "model": req.model,
            "messages": messages,
            "stream": false,
            "options": { "temperature": req.temperature },
        });
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }
        if let Some(schema) = &req.format {
            body["format"] = schema.clone();
        }
        body
    }

    fn parse_response(body: Value) -> ChatResponse {
        let message = &body["message"];
        let content = message["content"].as_str().unwrap_or_default().to_string();
        let thinking = message["thinking"]
            .as_str()
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        let mut tool_calls = Vec::new();
        if let Some(calls) = message["tool_calls"].as_array() {
            for call in calls {
                let func = &call["function"];
                let name = match func["name"].as_str() {
                    Some(n) if !n.is_empty() => n.to_string(),
                    // Cannot dispatch a nameless call; drop it rather than
                    // feed garbage to the registry.
                    _ => continue,
                };
                // `arguments` arrives as an object from Ollama but as an
                // encoded string from some OpenAI-compat proxies.
                let arguments = match &func["arguments"] {
                    Value::String(s) => serde_json::from_str(s)
                        .unwrap_or_else(|_| Value::Object(Default::default())),
                    Value::Null => Value::Object(Default::default()),
                    v => v.clone(),
                };
                tool_calls.push(BackendToolCall { name, arguments });
            }
        }
        ChatResponse { content, thinking, tool_calls }
    }
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = Self::build_body(&req);
        debug!(model = %req.model, url = %url, "chat request");

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transient(format!("request to {url} failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            // 5xx is worth a retry; 4xx will keep failing until config or
            // payload changes.
            return if status.is_server_error() {
                Err(LlmError::Transient(format!("{} error {status}: {text}", self.name())))
            } else {
                Err(LlmError::Fatal(format!("{} error {status}: {text}", self.name())))
            };
        }

        let payload: Value = resp
            .json()
            .await
            .map_err(|e| LlmError::Transient(format!("reading response body: {e}")))?;
        Ok(Self::parse_response(payload))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{ChatMessage, ToolSchema};

    fn backend() -> OllamaBackend {
        OllamaBackend::new("http://localhost:11434/", Duration::from_secs(5))
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        assert_eq!(backend().base_url, "http://localhost:11434");
    }

    #[test]
    fn build_body_includes_messages_and_options() {
        let req = ChatRequest {
            model: "gpt-oss:20b".into(),
            messages: vec![ChatMessage::system("sys"), ChatMessage::user("hello")],
            ..Default::default()
        };
        let body = OllamaBackend::build_body(&req);
        assert_eq!(body["model"], "gpt-oss:20b");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
        assert!(body.get("tools").is_none());
        assert!(body.get("format").is_none());
    }

    #[test]
    fn build_body_binds_tools() {
        let req = ChatRequest {
            model: "m".into(),
            messages: vec![ChatMessage::user("x")],
            tools: vec![ToolSchema {
                name: "list_patients".into(),
                description: "d".into(),
                parameters: json!({"type": "object"}),
            }],
            ..Default::default()
        };
        let body = OllamaBackend::build_body(&req);
        assert_eq!(body["tools"][0]["function"]["name"], "list_patients");
    }

    #[test]
    fn build_body_carries_format_schema() {
        let req = ChatRequest {
            model: "m".into(),
            messages: vec![ChatMessage::user("x")],
            format: Some(json!({"type": "object", "properties": {"done": {"type": "boolean"}}})),
            ..Default::default()
        };
        let body = OllamaBackend::build_body(&req);
        assert_eq!(body["format"]["type"], "object");
    }

    #[test]
    fn build_body_attaches_images() {
        let req = ChatRequest {
            model: "qwen3-vl:8b".into(),
            messages: vec![ChatMessage::user_with_images("what is this", vec!["QUJD".into()])],
            ..Default::default()
        };
        let body = OllamaBackend::build_body(&req);
        assert_eq!(body["messages"][0]["images"][0], "QUJD");
    }

    #[test]
    fn parse_response_extracts_content_and_thinking() {
        let resp = OllamaBackend::parse_response(json!({
            "message": { "role": "assistant", "content": "answer", "thinking": "because" }
        }));
        assert_eq!(resp.content, "answer");
        assert_eq!(resp.thinking.as_deref(), Some("because"));
        assert!(resp.tool_calls.is_empty());
    }

    #[test]
    fn parse_response_extracts_native_tool_calls() {
        let resp = OllamaBackend::parse_response(json!({
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [
                    { "function": { "name": "list_patients", "arguments": { "limit": 3 } } }
                ]
            }
        }));
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "list_patients");
        assert_eq!(resp.tool_calls[0].arguments["limit"], 3);
    }

    #[test]
    fn parse_response_accepts_string_encoded_arguments() {
        let resp = OllamaBackend::parse_response(json!({
            "message": {
                "content": "",
                "tool_calls": [
                    { "function": { "name": "t", "arguments": "{\"x\": 1}" } }
                ]
            }
        }));
        assert_eq!(resp.tool_calls[0].arguments["x"], 1);
    }

    #[test]
    fn parse_response_drops_nameless_calls() {
        let resp = OllamaBackend::parse_response(json!({
            "message": {
                "content": "",
                "tool_calls": [ { "function": { "arguments": {} } } ]
            }
        }));
        assert!(resp.tool_calls.is_empty());
    }

    #[test]
    fn parse_response_tolerates_missing_message() {
        let resp = OllamaBackend::parse_response(json!({}));
        assert!(resp.content.is_empty());
        assert!(resp.thinking.is_none());
    }
}
