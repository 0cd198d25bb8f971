// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Tool-output history sizing.
//!
//! Prompts embed the accumulated tool outputs; this module keeps that
//! within the model's context budget.  Newest outputs are kept verbatim
//! (they are what the next action decision depends on), older ones collapse
//! to one-line placeholders, and the oldest drop entirely when even the
//! placeholders would not fit.  Token counts use the 4-chars ≈ 1-token
//! heuristic throughout.

use serde_json::Value;

const CHARS_PER_TOKEN: usize = 4;
/// Leading characters of an elided output kept in its placeholder.
const PLACEHOLDER_PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextStats {
    pub estimated_tokens: usize,
    pub budget_tokens: usize,
    pub utilization: f32,
    pub at_risk: bool,
}

/// Estimate utilization of the output history against a budget.
pub fn stats(outputs: &[String], budget_tokens: usize, warn_threshold: f32) -> ContextStats {
    let chars: usize = outputs.iter().map(|o| o.len() + 1).sum();
    let estimated_tokens = chars / CHARS_PER_TOKEN;
    let utilization = if budget_tokens == 0 {
        0.0
    } else {
        estimated_tokens as f32 / budget_tokens as f32
    };
    ContextStats {
        estimated_tokens,
        budget_tokens,
        utilization,
        at_risk: budget_tokens > 0 && utilization >= warn_threshold,
    }
}

/// Concatenate the history to fit `budget_tokens`, preferring the newest
/// outputs.  The result preserves chronological order.
pub fn compose(outputs: &[String], budget_tokens: usize) -> String {
    if outputs.is_empty() {
        return String::new();
    }
    let budget_chars = budget_tokens.saturating_mul(CHARS_PER_TOKEN);
    let total: usize = outputs.iter().map(|o| o.len() + 1).sum();
    if total <= budget_chars {
        return outputs.join("\n");
    }

    // Walk backwards keeping outputs verbatim while they fit; everything
    // older gets a placeholder, and placeholders that do not fit either
    // are dropped.
    let mut kept: Vec<String> = Vec::with_capacity(outputs.len());
    let mut used = 0usize;
    let mut verbatim_budget_exhausted = false;
    for output in outputs.iter().rev() {
        if !verbatim_budget_exhausted && used + output.len() + 1 <= budget_chars {
            used += output.len() + 1;
            kept.push(output.clone());
            continue;
        }
        verbatim_budget_exhausted = true;
        let placeholder = elision_placeholder(output);
        if used + placeholder.len() + 1 <= budget_chars {
            used += placeholder.len() + 1;
            kept.push(placeholder);
        }
        // else: dropped entirely.
    }
    kept.reverse();
    kept.join("\n")
}

fn elision_placeholder(output: &str) -> String {
    let head: String = output.chars().take(PLACEHOLDER_PREVIEW_CHARS).collect();
    let head = head.replace('\n', " ");
    format!("[earlier output elided ({} chars): {head}…]", output.len())
}

/// Render one tool execution for the history.  The result JSON is capped
/// so a single enormous output cannot crowd out everything else.
pub fn format_output(tool: &str, args: &Value, result: &Value, char_cap: usize) -> String {
    let rendered = match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let rendered = truncate_chars(&rendered, char_cap);
    format!("Tool {tool} with args {args} returned: {rendered}")
}

fn truncate_chars(s: &str, cap: usize) -> String {
    if cap == 0 || s.chars().count() <= cap {
        return s.to_string();
    }
    let cut: String = s.chars().take(cap).collect();
    format!("{cut}… [truncated, {} chars total]", s.chars().count())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn stats_empty_history_is_zero() {
        let s = stats(&[], 1000, 0.8);
        assert_eq!(s.estimated_tokens, 0);
        assert!(!s.at_risk);
    }

    #[test]
    fn stats_flags_at_risk_over_threshold() {
        // 4000 chars ≈ 1000 tokens against a 1000-token budget.
        let outputs = vec!["x".repeat(4000)];
        let s = stats(&outputs, 1000, 0.8);
        assert!(s.at_risk);
        assert!(s.utilization >= 0.8);
    }

    #[test]
    fn stats_zero_budget_never_at_risk() {
        let outputs = vec!["data".to_string()];
        assert!(!stats(&outputs, 0, 0.8).at_risk);
    }

    #[test]
    fn compose_under_budget_returns_everything() {
        let outputs = vec!["first".to_string(), "second".to_string()];
        assert_eq!(compose(&outputs, 1000), "first\nsecond");
    }

    #[test]
    fn compose_keeps_newest_verbatim() {
        let outputs = vec!["old ".repeat(200), "newest output".to_string()];
        // Budget fits the newest but not the old one.
        let composed = compose(&outputs, 30);
        assert!(composed.contains("newest output"));
        assert!(!composed.contains("old old old old old old old old old"));
    }

    #[test]
    fn compose_elides_older_with_placeholder() {
        let outputs = vec!["a".repeat(400), "b".repeat(50)];
        let composed = compose(&outputs, 50);
        assert!(composed.contains("elided"));
        assert!(composed.contains(&"b".repeat(50)));
        // Chronological order: placeholder first.
        assert!(composed.find("elided").unwrap() < composed.find(&"b".repeat(50)).unwrap());
    }

    #[test]
    fn compose_drops_what_placeholders_cannot_fit() {
        let outputs: Vec<String> = (0..50).map(|i| format!("{i} ") + &"x".repeat(400)).collect();
        let composed = compose(&outputs, 30);
        // Tight budget: newest kept or elided, oldest gone entirely.
        assert!(composed.len() <= 30 * 4 + 64);
        assert!(!composed.contains("0 xxxx"));
    }

    #[test]
    fn compose_is_deterministic() {
        let outputs = vec!["a".repeat(300), "b".repeat(300), "c".repeat(300)];
        assert_eq!(compose(&outputs, 100), compose(&outputs, 100));
    }

    #[test]
    fn format_output_renders_tool_args_result() {
        let line = format_output(
            "list_patients",
            &json!({ "limit": 3 }),
            &json!({ "patients": ["p1"] }),
            1000,
        );
        assert!(line.starts_with("Tool list_patients with args {\"limit\":3}"));
        assert!(line.contains("p1"));
    }

    #[test]
    fn format_output_caps_huge_results() {
        let big = json!("y".repeat(10_000));
        let line = format_output("t", &json!({}), &big, 100);
        assert!(line.len() < 300);
        assert!(line.contains("[truncated"));
    }

    #[test]
    fn format_output_strings_render_bare() {
        let line = format_output("t", &json!({}), &json!("plain message"), 100);
        assert!(line.contains("returned: plain message"));
    }
}
