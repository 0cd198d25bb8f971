// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;
mod render;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use ward_core::{Agent, GatewayVisionOracle};
use ward_model::{capability, LlmGateway, OllamaBackend};
use ward_sandbox::Sandbox;
use ward_store::RecordStore;
use ward_tools::builtin_registry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(Commands::ListModels { json }) = &cli.command {
        return list_models(*json);
    }

    let Some(query) = cli.query.clone() else {
        anyhow::bail!("no query given; run `ward \"<clinical question>\"` or `ward list-models`");
    };

    let config = ward_config::load(cli.config.as_deref()).context("loading configuration")?;
    let model = cli.model.unwrap_or_else(|| config.backend.model.clone());

    // Session-scoped cancellation: Ctrl-C aborts in-flight model calls and
    // tool dispatch; the agent still attempts an answer over collected data.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupt received, winding down the session");
                cancel.cancel();
            }
        });
    }

    let backend = Arc::new(OllamaBackend::new(
        config.backend.base_url.clone(),
        Duration::from_secs(config.backend.request_timeout_secs),
    ));
    let gateway = Arc::new(LlmGateway::new(
        backend,
        model.clone(),
        capability(&model),
        cancel.clone(),
    ));

    let store = Arc::new(RecordStore::new(
        config.data.records_dir.clone(),
        config.data.ecg_csv.clone(),
        config.data.dicom_dir.clone(),
    ));
    let oracle = Arc::new(GatewayVisionOracle::new(gateway.clone()));
    let sandbox = Arc::new(Sandbox::new(store.clone(), oracle.clone()));
    let registry = Arc::new(builtin_registry(store, sandbox, oracle));

    let (tx, rx) = mpsc::channel(256);
    let printer = tokio::spawn(render::print_events(rx, cli.json));

    let mut agent = Agent::new(
        gateway,
        registry,
        config.agent.clone(),
        config.context.clone(),
        tx,
        cancel,
    );
    let answer = agent.run(&query).await;
    // Dropping the agent drops the event sender, which lets the printer
    // drain and exit.
    drop(agent);
    let _ = printer.await;

    if !cli.json {
        println!("\n{answer}");
    }
    Ok(())
}

fn list_models(json: bool) -> anyhow::Result<()> {
    let models = ward_model::registry();
    if json {
        println!("{}", serde_json::to_string_pretty(&models)?);
        return Ok(());
    }
    for cap in models {
        let strategy = if cap.native_tools { "native tools" } else { "prompt-JSON" };
        let vision = if cap.vision { ", vision" } else { "" };
        println!(
            "{:<16} {:<28} {:>7} ctx  ({strategy}{vision})",
            cap.name, cap.display_name, cap.context_window
        );
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "ward=debug,info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}
