// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "ward",
    about = "Autonomous clinical-records analysis agent for local LLMs",
    version
)]
pub struct Cli {
    /// The clinical query to analyze.
    pub query: Option<String>,

    /// Model to drive the session with (overrides config and WARD_MODEL).
    #[arg(short, long)]
    pub model: Option<String>,

    /// Explicit config file path.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Stream events as NDJSON instead of human-readable lines.
    #[arg(long)]
    pub json: bool,

    /// Verbose logging to stderr (RUST_LOG still wins when set).
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the model capability table.
    ListModels {
        /// Emit JSON instead of the table.
        #[arg(long)]
        json: bool,
    },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
