// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Read;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use maestro_config::DbDriver;
use maestro_orch::extract_task_blocks;
use maestro_server::AppState;
use maestro_store::{MemoryPersistence, Persistence};
use maestro_trace::{JsonlTraceSink, MemoryTraceSink, TraceSink};

// ── Exit codes ────────────────────────────────────────────────────────────────

const EXIT_GENERIC_ERROR: i32 = 1;
const EXIT_INVALID_ARGS: i32 = 2;
const EXIT_UPSTREAM_UNAVAILABLE: i32 = 64;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("maestro: {e:#}");
            e.downcast_ref::<ExitHint>().map(|h| h.0).unwrap_or(EXIT_GENERIC_ERROR)
        }
    };
    std::process::exit(code);
}

/// Error wrapper carrying an explicit exit code through anyhow.
#[derive(Debug)]
struct ExitHint(i32);

impl std::fmt::Display for ExitHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "exit {}", self.0)
    }
}

impl std::error::Error for ExitHint {}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Completions { shell } => {
            cli::print_completions(shell);
            Ok(())
        }
        Commands::ShowConfig => {
            let config = maestro_config::load(cli.config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Commands::ExtractTasks { file } => extract_tasks_cmd(&file),
        Commands::Serve { port, journal } => {
            let mut config = maestro_config::load(cli.config.as_deref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            serve_cmd(Arc::new(config), journal.as_deref()).await
        }
    }
}

async fn serve_cmd(
    config: Arc<maestro_config::Config>,
    journal: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    // Only the in-memory driver ships in this build; asking for a network
    // or file driver without one compiled in is an environment problem.
    let persistence: Arc<dyn Persistence> = match config.db.driver {
        DbDriver::Memory => Arc::new(MemoryPersistence::new()),
        other => {
            return Err(anyhow::Error::new(ExitHint(EXIT_UPSTREAM_UNAVAILABLE)).context(format!(
                "persistence driver {other:?} is not available in this build (set MAESTRO_DB=memory)"
            )));
        }
    };

    let trace_sink: Arc<dyn TraceSink> = match journal {
        Some(path) => Arc::new(JsonlTraceSink::open(path).await?),
        None => Arc::new(MemoryTraceSink::new()),
    };

    let state = AppState::build_with(config, persistence, trace_sink, None);
    maestro_server::serve(state).await
}

fn extract_tasks_cmd(file: &str) -> anyhow::Result<()> {
    let text = if file == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(file).map_err(|e| {
            anyhow::Error::new(ExitHint(EXIT_INVALID_ARGS)).context(format!("reading {file}: {e}"))
        })?
    };

    let extraction = extract_task_blocks(&text);
    let out = serde_json::json!({
        "blockCount": extraction.block_count,
        "validTaskCount": extraction.valid_count,
        "invalidBlockCount": extraction.invalid_count,
        "tasks": extraction.tasks,
        "cleanedText": extraction.cleaned_text,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

/// Map -v/-vv to debug/trace; RUST_LOG always wins.
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("maestro={default},tower_http=warn")));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}
