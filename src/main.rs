// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands, ControllerArg, OutputFormatArg};
use sre_core::controllers::Controller;
use sre_core::{DefaultPromptBuilder, ExecutionResult, RunStatus};
use sre_model::MockModelClient;
use sre_store::InMemoryStore;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(cmd) = &cli.command {
        match cmd {
            Commands::Completions { shell } => {
                cli::print_completions(*shell);
                return Ok(());
            }
            Commands::ShowConfig => {
                let config = sre_config::load(cli.config.as_deref())?;
                println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
                return Ok(());
            }
        }
    }

    let config = sre_config::load(cli.config.as_deref())?;
    let input = cli.input.unwrap_or_default();

    // The live model/tool wiring is an external collaborator (out of scope
    // for this core, see SPEC_FULL §1/§6); the CLI drives the controllers
    // against the mock client and an in-memory store so the binary is a
    // runnable demonstration of the loop, not a production front-end.
    let model = Arc::new(MockModelClient);
    let store = Arc::new(InMemoryStore::new());
    let prompt_builder = Arc::new(DefaultPromptBuilder::new(input.clone(), String::new()));

    let ctx = sre_core::ExecutionContext::new(
        uuid::Uuid::new_v4().to_string(),
        "cli".to_string(),
        uuid::Uuid::new_v4().to_string(),
        config,
        model,
        vec![],
        prompt_builder,
        store,
    );

    let controller = match cli.controller {
        ControllerArg::Iterating => Controller::Iterating,
        ControllerArg::React => Controller::React,
        ControllerArg::SingleShot => {
            Controller::SingleShot(sre_core::SingleShotController::new("final_analysis", true))
        }
        ControllerArg::Scoring => Controller::Scoring,
    };

    let result = controller.run(&ctx, &input).await;
    print_result(&result, cli.output_format);

    if !result.is_completed() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_result(result: &ExecutionResult, format: OutputFormatArg) {
    match format {
        OutputFormatArg::Text => match result.status {
            RunStatus::Completed => println!("{}", result.final_analysis),
            _ => eprintln!(
                "{:?}: {}",
                result.status,
                result.error.as_deref().unwrap_or(&result.final_analysis)
            ),
        },
        OutputFormatArg::Json => {
            let payload = serde_json::json!({
                "status": format!("{:?}", result.status),
                "final_analysis": result.final_analysis,
                "error": result.error,
                "tokens_used": {
                    "input_tokens": result.tokens_used.input_tokens,
                    "output_tokens": result.tokens_used.output_tokens,
                    "total_tokens": result.tokens_used.total_tokens,
                    "thinking_tokens": result.tokens_used.thinking_tokens,
                },
            });
            println!("{}", serde_json::to_string_pretty(&payload).unwrap_or_default());
        }
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
