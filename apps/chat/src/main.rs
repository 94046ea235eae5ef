mod config;
mod terminal;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use llm_worker::serve_json_lines;
use tracing_subscriber::EnvFilter;

use crate::config::{load_settings, Settings};

#[derive(Parser, Debug)]
#[command(name = "llm-chat", version, about = "Chat with an LLM running in a background worker")]
struct Cli {
    /// TOML settings file; defaults to ./llm-chat.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    model: Option<String>,
    /// Base URL of an OpenAI-compatible inference server.
    #[arg(long, global = true)]
    engine_url: Option<String>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive chat on stdin/stdout.
    Chat {
        /// Run the worker as a child process instead of a thread.
        #[arg(long)]
        isolated: bool,
    },
    /// Speak the JSON-lines worker protocol on stdin/stdout.
    Worker,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(model) = cli.model {
        settings.model_id = model;
    }
    if let Some(engine_url) = cli.engine_url {
        settings.engine_url = Some(engine_url);
    }

    match cli.command.unwrap_or(Command::Chat { isolated: false }) {
        Command::Chat { isolated } => terminal::run_chat(&settings, isolated),
        Command::Worker => run_worker(&settings),
    }
}

fn run_worker(settings: &Settings) -> Result<()> {
    let factory = settings.engine_factory()?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build worker runtime")?;
    runtime.block_on(serve_json_lines(
        tokio::io::stdin(),
        std::io::stdout(),
        settings.worker_config(),
        factory,
    ))
}
