// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

/// Events emitted by the agent during one `run()`, in state-transition
/// order.  Serializes as `{"type": …, "data": {…}}` for the streaming
/// frontend; clients must tolerate types they do not know.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The query was accepted and the session started.
    Start { message: String, model: String },
    TaskStart { task: String },
    /// A tool was dispatched; `result` is a preview truncated to 500 chars.
    ToolExecution { tool: String, args: Value, result: String },
    TaskComplete { task: String },
    /// Progress and diagnostics (context warnings, retries, loop aborts).
    Log { message: String },
    /// The synthesized clinical answer.
    Answer { answer: String },
    /// Terminal event; carries the answer again for clients that only read
    /// the last frame.
    Complete { answer: String },
    Error { message: String },
}

pub type EventSender = mpsc::Sender<AgentEvent>;

/// Best-effort emit: a disconnected or slow consumer never stalls or fails
/// the loop.
pub async fn emit(tx: &EventSender, event: AgentEvent) {
    let _ = tx.send(event).await;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
