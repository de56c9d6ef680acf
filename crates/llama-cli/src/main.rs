use std::io;

use clap::Parser;
use llama_cli::{run, Cli};
use llama_runtime::MockEngine;
use llama_session::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries only command output.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let runtime = Runtime::new(MockEngine::new());
    let stdout = io::stdout();
    run(&runtime, &cli.command, &mut stdout.lock())
}
