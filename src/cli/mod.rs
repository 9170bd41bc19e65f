use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::app::InventoryApp;
use crate::config::{ConfigLoader, RemoteConfig};
use crate::error::GatewayError;
use crate::remote::HttpGateway;
use crate::storage;

pub mod commands;

use self::commands::{AddArgs, DeleteArgs, ListArgs, UpdateArgs, WatchArgs};

#[derive(Parser, Debug)]
#[command(
    name = "prepinv",
    version,
    about = "Offline-first household inventory with expiration tracking"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override the config file location (takes precedence over PREPINV_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over PREPINV_DATA)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Never contact the remote store; work from the cache and queue
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print items grouped by urgency
    List(ListArgs),
    /// Queue a new item
    Add(AddArgs),
    /// Queue changes to an existing item
    Update(UpdateArgs),
    /// Queue removal of an item
    Delete(DeleteArgs),
    /// Replay pending changes now
    Sync,
    /// Show changes waiting to be synced
    Pending,
    /// Refresh and sync periodically until interrupted
    Watch(WatchArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;

    let loader = ConfigLoader::with_overrides(cli.config.clone(), cli.data_dir.clone())?;
    let config = loader.load_or_init()?;
    let storage = storage::init(loader.paths(), &config.storage)?;

    let gateway = if cli.offline {
        None
    } else {
        build_gateway(&config.remote)?
    };
    let network_enabled = gateway.is_some();
    let app = InventoryApp::new(Arc::new(config), storage, gateway, network_enabled);

    if let Some(report) = app.startup()? {
        commands::announce_startup_sync(&report);
    }
    let result = match cli.command {
        Commands::List(args) => commands::list(&app, args),
        Commands::Add(args) => commands::add(&app, args),
        Commands::Update(args) => commands::update(&app, args),
        Commands::Delete(args) => commands::delete(&app, args),
        Commands::Sync => commands::sync(&app),
        Commands::Pending => commands::pending(&app),
        Commands::Watch(args) => commands::watch(&app, args),
    };
    let shutdown = app.shutdown()?;
    if shutdown.pending > 0 {
        eprintln!("{} change(s) still waiting to sync", shutdown.pending);
    }
    result
}

fn build_gateway(remote: &RemoteConfig) -> Result<Option<HttpGateway>> {
    match HttpGateway::from_config(remote) {
        Ok(gateway) => {
            tracing::debug!(endpoint = gateway.endpoint(), "remote gateway ready");
            Ok(Some(gateway))
        }
        Err(GatewayError::NotConfigured) => {
            tracing::warn!("no remote endpoint configured, working from local data only");
            Ok(None)
        }
        Err(err) => Err(err).context("building remote gateway"),
    }
}

fn init_tracing(level: &str) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|err| anyhow::anyhow!(err))?;
        Ok(())
    })
    .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_follow_subcommands() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(["prepinv", "sync", "--offline", "--log-level", "debug"])?;
        assert!(cli.offline);
        assert_eq!(cli.log_level, "debug");
        assert!(matches!(cli.command, Commands::Sync));
        Ok(())
    }
}
