mod apply;
mod cli;
mod config;
mod derive;
mod error;
mod extract;
mod ledger;
mod logging;
mod matcher;
mod model;
mod providers;
mod util;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose, cli.quiet, cli.log_file.as_deref())?;

    let config = config::load_config(cli.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    runtime.block_on(async {
        match &cli.command {
            Commands::BuildMap(args) => cli::handle_build_map(args, &config).await,
            Commands::Apply(args) => cli::handle_apply(args, &config).await,
            Commands::Revalidate(args) => cli::handle_revalidate(args, &config).await,
        }
    })
}
