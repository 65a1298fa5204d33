//! cpm - a package manager for native libraries

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cpm_cli::cmd;
use cpm_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; -v raises the default from warnings to debug.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, stopping...");
            on_interrupt.cancel();
        }
    });

    let session = cli.session()?;

    match &cli.command {
        Commands::Resolve => cmd::resolve::resolve(&session, &cancel).await,
        Commands::Graph => cmd::graph::graph(&session, &cancel).await,
        Commands::Tidy => cmd::tidy::tidy(&session, &cancel).await,
        Commands::Get { spec } => cmd::get::get(&session, &cancel, spec).await,
        Commands::Build { arch, os, define } => {
            cmd::build::build(
                &session,
                &cancel,
                arch.as_deref(),
                os.as_deref(),
                define,
            )
            .await
        }
    }
}
