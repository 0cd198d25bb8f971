// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Event-stream rendering for the CLI: one NDJSON frame per event with
//! `--json`, terse human-readable lines otherwise.

use tokio::sync::mpsc;

use ward_core::AgentEvent;

/// Drain the event channel until the agent drops its sender.
pub async fn print_events(mut rx: mpsc::Receiver<AgentEvent>, json: bool) {
    while let Some(event) = rx.recv().await {
        if json {
            if let Ok(frame) = serde_json::to_string(&event) {
                println!("{frame}");
            }
        } else if let Some(line) = human_line(&event) {
            eprintln!("{line}");
        }
    }
}

/// Human rendering; returns `None` for events the terminal view skips
/// (the answer is printed by `main` after the run).
fn human_line(event: &AgentEvent) -> Option<String> {
    match event {
        AgentEvent::Start { message, model } => {
            Some(format!("▶ {model}: {message}"))
        }
        AgentEvent::TaskStart { task } => Some(format!("• task: {task}")),
        AgentEvent::ToolExecution { tool, args, result } => {
            let preview: String = result.chars().take(120).collect();
            Some(format!("  ↳ {tool} {args} → {preview}"))
        }
        AgentEvent::TaskComplete { task } => Some(format!("✓ done: {task}")),
        AgentEvent::Log { message } => Some(format!("  · {message}")),
        AgentEvent::Error { message } => Some(format!("! {message}")),
        AgentEvent::Answer { .. } | AgentEvent::Complete { .. } => None,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
