use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

mod canonical;
mod cli;
mod command;
mod config;
mod error;
mod fingerprint;
mod guard;
mod lease;
mod mcp;
mod patch;
mod snapshot;
mod store;
#[cfg(test)]
mod test_support;
mod workspace;

use cli::{Cli, Commands};
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout belongs to the MCP transport
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let repo_root = cli::resolve_repo_root(cli.repo_root.clone())?;
    let limits = cli.limits();

    match cli.command {
        None | Some(Commands::Serve) => {
            let config = Config::new(repo_root, cli.data_dir, limits)?;
            command::run_serve(config).await?;
        }
        Some(Commands::Fingerprint) => {
            command::run_fingerprint(&repo_root).await?;
        }
        Some(Commands::Export {
            snapshot_id,
            output,
        }) => {
            let config = Config::new(repo_root, cli.data_dir, limits)?;
            command::run_export(&config, &snapshot_id, &output).await?;
        }
        Some(Commands::Verify) => {
            let config = Config::new(repo_root, cli.data_dir, limits)?;
            command::run_verify(&config).await?;
        }
    }

    Ok(())
}
