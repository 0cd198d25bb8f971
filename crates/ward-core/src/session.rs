// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{HashSet, VecDeque};

use uuid::Uuid;

use crate::schemas::Task;

/// How many identical consecutive action signatures constitute a loop.
const ACTION_RING_SIZE: usize = 4;

/// Mutable per-`run()` state.  Owned exclusively by the agent; everything
/// else in the system is immutable or stateless.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub model: String,
    pub tasks: Vec<Task>,
    /// Ordered tool-output history for the whole session.
    pub outputs: Vec<String>,
    /// Ring of recent action signatures for repeat detection.
    last_actions: VecDeque<String>,
    pub step_count: u32,
    pub agent_error_count: u32,
    /// Tasks abandoned on deadline: not done, but never re-picked.
    abandoned: HashSet<u32>,
}

impl Session {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            model: model.into(),
            tasks: Vec::new(),
            outputs: Vec::new(),
            last_actions: VecDeque::with_capacity(ACTION_RING_SIZE),
            step_count: 0,
            agent_error_count: 0,
            abandoned: HashSet::new(),
        }
    }

    /// Record an action signature and report whether the ring is now full
    /// of identical entries, the loop-detection trigger.
    pub fn push_action(&mut self, signature: String) -> bool {
        if self.last_actions.len() == ACTION_RING_SIZE {
            self.last_actions.pop_front();
        }
        self.last_actions.push_back(signature);
        self.last_actions.len() == ACTION_RING_SIZE
            && self
                .last_actions
                .iter()
                .all(|s| s == &self.last_actions[0])
    }

    pub fn record_output(&mut self, output: String) {
        self.outputs.push(output);
    }

    /// Index of the next workable task: not done and not abandoned.
    pub fn next_open_task(&self) -> Option<usize> {
        self.tasks
            .iter()
            .position(|t| !t.done && !self.abandoned.contains(&t.id))
    }

    pub fn abandon_task(&mut self, id: u32) {
        self.abandoned.insert(id);
    }

    pub fn all_tasks_settled(&self) -> bool {
        self.next_open_task().is_none()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
