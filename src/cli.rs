// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use std::path::PathBuf;

/// Which controller variant (§4) drives the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ControllerArg {
    /// Native tool-call loop (§4.1).
    #[default]
    Iterating,
    /// Text-format tool-call loop, parsed with the ReAct grammar (§4.2).
    React,
    /// One model call, no tools (§4.3).
    SingleShot,
    /// Score extraction followed by a missing-tools report (§4.4).
    Scoring,
}

/// Output format for a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormatArg {
    /// Plain text: just the final analysis.
    #[default]
    Text,
    /// Structured JSON: status, final analysis, token usage.
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "sre-agent",
    about = "Iteration controller core for an AI site-reliability agent",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Alert payload or task description to run through the controller.
    #[arg(value_name = "INPUT")]
    pub input: Option<String>,

    /// Which controller variant to run.
    #[arg(long, short = 'C', value_enum, default_value = "iterating")]
    pub controller: ControllerArg,

    /// Path to config file (overrides auto-discovery).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Output format.
    #[arg(long, value_enum, default_value = "text")]
    pub output_format: OutputFormatArg,

    /// Increase verbosity (-v = debug, -vv = trace).
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the effective configuration and exit.
    ShowConfig,
    /// Generate a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "sre-agent", &mut std::io::stdout());
}
