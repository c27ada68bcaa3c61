mod cli;
mod commands;
mod loader;
mod output;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match run(&cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            print_error(&format!("{e:#}"));
            std::process::exit(1);
        }
    }
}

fn init_tracing(level: &str) {
    // RUST_LOG wins over --log-level.
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Returns `false` when a decision was a denial.
async fn run(cli: &Cli) -> Result<bool> {
    let format = cli.format.unwrap_or_default();

    match &cli.command {
        Commands::Check(args) => {
            let engine = loader::build_engine(cli, loader::load_store(&cli.policies)?).await?;
            commands::check::check(&engine, args, format).await
        }
        Commands::Authorize(args) => {
            let engine = loader::build_engine(cli, loader::load_store(&cli.policies)?).await?;
            commands::authorize::authorize(&engine, args, format).await
        }
        Commands::Explain(args) => {
            let store = match args.condition {
                Some(_) => None,
                None => Some(loader::load_store(&cli.policies)?),
            };
            let catalog = loader::load_catalog(cli.catalog.as_deref())?;
            commands::explain::explain(store.as_deref(), catalog, args, format)?;
            Ok(true)
        }
        Commands::Risk(args) => {
            let store = std::sync::Arc::new(warden_policy::InMemoryPolicyStore::new());
            let engine = loader::build_engine(cli, store).await?;
            commands::risk::risk(&engine, args, format).await?;
            Ok(true)
        }
    }
}
