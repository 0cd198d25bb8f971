// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The single entry point for talking to the model.
//!
//! Three request shapes, selected by what the caller provides:
//!
//! - **structured**: an output schema is given; the backend is forced into
//!   JSON-schema mode and the reply content is parsed into the target type.
//! - **action**: a tool catalogue is given; native-tool models get the
//!   schemas bound on the request, prompt-JSON models get the selection
//!   protocol appended to the prompt and the reply content run through the
//!   tool-call parser.  Both paths produce the same [`ActionReply`].
//! - **vision**: free-form text over one or more base64 images.
//!
//! Transient backend failures are retried with exponential backoff
//! (0.5 s base, factor 2) up to the capability's retry budget.  Every await
//! point is raced against the session cancellation token.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    capability::{tool_selection_block, ModelCapability},
    parser::{parse_tool_call, synthetic_call_id},
    ChatBackend, ChatMessage, ChatRequest, ChatResponse, LlmError, ToolSchema,
};

const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// A tool invocation normalised from either dispatch strategy.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// Reply from an action-selection call.
#[derive(Debug, Clone, Default)]
pub struct ActionReply {
    pub content: String,
    /// Reasoning the model offered alongside its selection, when any.
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolInvocation>,
    /// True when the calls were lifted out of text by the parser rather
    /// than returned natively.
    pub parsed_from_json: bool,
}

pub struct LlmGateway {
    backend: Arc<dyn ChatBackend>,
    model: String,
    capability: ModelCapability,
    cancel: CancellationToken,
}

impl LlmGateway {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        model: impl Into<String>,
        capability: ModelCapability,
        cancel: CancellationToken,
    ) -> Self {
        Self { backend, model: model.into(), capability, cancel }
    }

    pub fn capability(&self) -> &ModelCapability {
        &self.capability
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Structured-output call: the reply must deserialize into `T`.
    /// A reply that does not is an [`LlmError::Agent`], not a panic; the
    /// loop counts those against its error budget.
    pub async fn structured<T: DeserializeOwned>(
        &self,
        system_prompt: &str,
        prompt: &str,
        schema: Value,
    ) -> Result<T, LlmError> {
        let req = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::system(system_prompt), ChatMessage::user(prompt)],
            format: Some(schema),
            temperature: 0.0,
            ..Default::default()
        };
        let resp = self.chat_with_retry(req).await?;
        let content = effective_content(&resp);
        serde_json::from_str(content.trim()).map_err(|e| {
            LlmError::Agent(format!(
                "model reply violates the requested schema: {e}; got: {}",
                truncate(content, 200)
            ))
        })
    }

    /// Action-selection call: ask the model for the next tool to run.
    pub async fn select_action(
        &self,
        system_prompt: &str,
        prompt: &str,
        tools: &[ToolSchema],
        images: Vec<String>,
    ) -> Result<ActionReply, LlmError> {
        if self.capability.native_tools {
            self.select_action_native(system_prompt, prompt, tools, images).await
        } else {
            self.select_action_prompt_json(system_prompt, prompt, tools, images).await
        }
    }

    /// Free-form vision call over base64 PNG images.
    pub async fn vision(&self, prompt: &str, images: Vec<String>) -> Result<String, LlmError> {
        let req = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user_with_images(prompt, images)],
            temperature: 0.0,
            ..Default::default()
        };
        let resp = self.chat_with_retry(req).await?;
        Ok(effective_content(&resp).to_string())
    }

    async fn select_action_native(
        &self,
        system_prompt: &str,
        prompt: &str,
        tools: &[ToolSchema],
        images: Vec<String>,
    ) -> Result<ActionReply, LlmError> {
        let req = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(system_prompt),
                ChatMessage::user_with_images(prompt, images),
            ],
            tools: tools.to_vec(),
            temperature: 0.0,
            ..Default::default()
        };
        let resp = self.chat_with_retry(req).await?;
        let tool_calls = resp
            .tool_calls
            .iter()
            .map(|tc| ToolInvocation {
                id: synthetic_call_id(Some(&tc.name)),
                name: tc.name.clone(),
                args: tc.arguments.clone(),
            })
            .collect();
        Ok(ActionReply {
            content: effective_content(&resp).to_string(),
            reasoning: resp.thinking.clone(),
            tool_calls,
            parsed_from_json: false,
        })
    }

    async fn select_action_prompt_json(
        &self,
        system_prompt: &str,
        prompt: &str,
        tools: &[ToolSchema],
        images: Vec<String>,
    ) -> Result<ActionReply, LlmError> {
        let protocol = tool_selection_block(&self.capability, tools);
        let full_prompt = format!("{prompt}\n{protocol}");
        let req = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(system_prompt),
                ChatMessage::user_with_images(full_prompt, images),
            ],
            temperature: 0.0,
            ..Default::default()
        };
        let resp = self.chat_with_retry(req).await?;
        let content = effective_content(&resp).to_string();

        match parse_tool_call(&content) {
            Some(call) => {
                let tool_calls = match &call.tool_name {
                    Some(name) => vec![ToolInvocation {
                        id: call.call_id.clone(),
                        name: name.clone(),
                        args: Value::Object(call.tool_args.clone()),
                    }],
                    // Explicit null selection: the task needs no more tools.
                    None => Vec::new(),
                };
                Ok(ActionReply {
                    content,
                    reasoning: Some(call.reasoning).filter(|r| !r.is_empty()),
                    tool_calls,
                    parsed_from_json: true,
                })
            }
            None => {
                // Nothing parseable in the reply.  Treated like a no-tool
                // answer; the loop's validator decides what to make of it.
                debug!(model = %self.model, "prompt-JSON reply contained no tool call");
                Ok(ActionReply {
                    content,
                    reasoning: None,
                    tool_calls: Vec::new(),
                    parsed_from_json: true,
                })
            }
        }
    }

    /// One backend call with transient-failure retry and cancellation.
    async fn chat_with_retry(&self, req: ChatRequest) -> Result<ChatResponse, LlmError> {
        let budget = self.capability.max_retries_on_failure;
        let mut attempt = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }
            let result = tokio::select! {
                _ = self.cancel.cancelled() => Err(LlmError::Cancelled),
                r = self.backend.chat(req.clone()) => r,
            };
            match result {
                Err(e) if e.is_transient() && attempt < budget => {
                    let delay = BACKOFF_BASE * 2u32.pow(attempt);
                    warn!(
                        attempt = attempt + 1,
                        budget,
                        delay_ms = delay.as_millis() as u64,
                        "transient backend failure, retrying: {e}"
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(LlmError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                other => return other,
            }
        }
    }
}

/// Content with the thinking channel promoted when the model server put the
/// whole decision there and left `content` empty.
fn effective_content(resp: &ChatResponse) -> &str {
    if resp.content.trim().is_empty() {
        if let Some(thinking) = &resp.thinking {
            return thinking;
        }
    }
    &resp.content
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
