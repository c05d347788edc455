// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "maestro",
    about = "Orchestration runtime for multi-agent coding assistants",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file (overrides auto-discovery)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the orchestration server (JSON-RPC + SSE + background worker).
    ///
    /// Listens on the configured port (MAESTRO_PORT / SERVER_PORT override).
    /// The persistence driver is selected by MAESTRO_DB; only `memory`
    /// ships in this build — `sqlite` and `postgres` exit with code 64.
    Serve {
        /// Listen port (overrides config and environment).
        #[arg(long, short = 'p')]
        port: Option<u16>,
        /// Append the trace journal to this JSONL file.
        #[arg(long, value_name = "PATH")]
        journal: Option<PathBuf>,
    },

    /// Run the task-block extractor over a file (or stdin with '-') and
    /// print the result as JSON.
    ExtractTasks {
        /// Input file; '-' reads stdin.
        #[arg(value_name = "FILE", default_value = "-")]
        file: String,
    },

    /// Print the effective configuration and exit.
    ShowConfig,

    /// Generate shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "maestro", &mut std::io::stdout());
}
