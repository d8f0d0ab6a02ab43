use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

mod cli;

use cli::{Cli, Commands};
use openclaw_memory::Config;

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let project_dir = match cli.project {
        Some(ref p) => PathBuf::from(p),
        None => std::env::current_dir()?,
    };

    match cli.command {
        Commands::Memory(args) => {
            let config = Config::load(Some(&project_dir))?;
            cli::memory::run(args, config, &project_dir).await
        }
        Commands::Serve => {
            let config = Config::load(Some(&project_dir))?;
            cli::serve::run(config, &project_dir).await
        }
        Commands::Config(args) => cli::config::run(args).await,
        Commands::Paths => cli::paths::run(&project_dir),
    }
}
