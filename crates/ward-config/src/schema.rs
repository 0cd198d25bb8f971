// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub agent: AgentLimits,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub context: ContextConfig,
}

/// Connection settings for the local inference backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the Ollama-compatible server.  `OLLAMA_BASE_URL` wins
    /// over the config file when set.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Default model when the caller does not pass one explicitly.
    #[serde(default = "default_model")]
    pub model: String,
    /// Per-request timeout in seconds.  Local vision models can take minutes
    /// on CPU-only hosts, so this is generous by default.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Hard bounds on the agent loop.  Every limit exists to keep a misbehaving
/// model from turning one query into an unbounded session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLimits {
    /// Global tool-dispatch budget for one `run()` invocation.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Dispatch budget for a single task.
    #[serde(default = "default_max_steps_per_task")]
    pub max_steps_per_task: u32,
    /// How many times an empty tool result may trigger the retry-with-hint
    /// path within one task.
    #[serde(default = "default_max_retries_on_no_data")]
    pub max_retries_on_no_data: u32,
    /// Wall-clock deadline per task.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    /// Consecutive model failures before a task is force-completed.
    #[serde(default = "default_max_agent_errors")]
    pub max_agent_errors: u32,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_steps_per_task: default_max_steps_per_task(),
            max_retries_on_no_data: default_max_retries_on_no_data(),
            task_timeout_secs: default_task_timeout_secs(),
            max_agent_errors: default_max_agent_errors(),
        }
    }
}

/// Locations of the record corpus.  All access is read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory of per-patient JSON bundles.
    #[serde(default = "default_records_dir")]
    pub records_dir: PathBuf,
    /// CSV mapping patient id to a base64 PNG ECG waveform.
    #[serde(default = "default_ecg_csv")]
    pub ecg_csv: PathBuf,
    /// Directory of DICOM files; filenames encode patient demographics.
    #[serde(default = "default_dicom_dir")]
    pub dicom_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            records_dir: default_records_dir(),
            ecg_csv: default_ecg_csv(),
            dicom_dir: default_dicom_dir(),
        }
    }
}

/// Context-window accounting for prompt construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Tokens reserved for the live prompt and the expected completion; the
    /// tool-output history gets `context_window - headroom_tokens`.
    #[serde(default = "default_headroom_tokens")]
    pub headroom_tokens: usize,
    /// Utilization fraction at which a warning event is emitted.
    #[serde(default = "default_warn_threshold")]
    pub warn_threshold: f32,
    /// Per-output character cap applied when a single tool result is
    /// rendered into the history.
    #[serde(default = "default_output_char_cap")]
    pub output_char_cap: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            headroom_tokens: default_headroom_tokens(),
            warn_threshold: default_warn_threshold(),
            output_char_cap: default_output_char_cap(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "gpt-oss:20b".to_string()
}
fn default_request_timeout_secs() -> u64 {
    600
}
fn default_max_steps() -> u32 {
    20
}
fn default_max_steps_per_task() -> u32 {
    5
}
fn default_max_retries_on_no_data() -> u32 {
    2
}
fn default_task_timeout_secs() -> u64 {
    300
}
fn default_max_agent_errors() -> u32 {
    3
}
fn default_records_dir() -> PathBuf {
    PathBuf::from("data/fhir")
}
fn default_ecg_csv() -> PathBuf {
    PathBuf::from("data/csv/observations.csv")
}
fn default_dicom_dir() -> PathBuf {
    PathBuf::from("data/dicom")
}
fn default_headroom_tokens() -> usize {
    2048
}
fn default_warn_threshold() -> f32 {
    0.8
}
fn default_output_char_cap() -> usize {
    4000
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
