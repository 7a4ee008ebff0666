mod config;
mod reconcile;

use anyhow::{Context, Result};
use cirrus_settings::{FileSettingsSource, Settings, SettingsSource};
use clap::{Parser, Subcommand};
use config::AgentConfig;
use reconcile::Reconciler;
use std::io::stderr;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Cirrus VM agent: ephemeral disk and network reconciliation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Agent configuration file (JSON)
    #[arg(short, long, env = "CIRRUS_CONFIG")]
    config: Option<PathBuf>,

    /// Settings document to apply, overriding the configured path
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Verbose output - shows more detailed logs
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Converge networking, then partition the ephemeral disk
    Apply,
    /// Converge networking only
    Network,
    /// Partition the ephemeral disk only
    Partition,
    /// List the interfaces ifup knows how to configure
    Interfaces,
    /// Print the size of a block device in bytes
    DeviceSize {
        /// Block device path, e.g. /dev/sdb
        device: String,
    },
}

async fn load_settings(config: &AgentConfig) -> Result<Settings> {
    FileSettingsSource::new(config.settings_path.clone())
        .settings()
        .await
        .with_context(|| {
            format!(
                "Failed to load settings from {}",
                config.settings_path.display()
            )
        })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("cirrus={level}", level = level)));
    registry().with(filter).with(fmt::layer().with_writer(stderr)).init();

    let mut config = AgentConfig::load_or_default(cli.config.as_deref())?;
    if let Some(settings_path) = cli.settings {
        config.settings_path = settings_path;
    }
    debug!(?config, "Loaded agent configuration");

    let reconciler = Reconciler::system(config.clone());

    match cli.command {
        Commands::Apply => {
            let settings = load_settings(&config).await?;
            reconciler.apply(&settings).await?;
            info!("Reconciliation complete");
        }
        Commands::Network => {
            let settings = load_settings(&config).await?;
            reconciler.network(&settings).await?;
            info!("Networking converged");
        }
        Commands::Partition => {
            let settings = load_settings(&config).await?;
            reconciler.partition(&settings).await?;
        }
        Commands::Interfaces => {
            for name in reconciler.configured_interfaces().await? {
                println!("{}", name);
            }
        }
        Commands::DeviceSize { device } => {
            println!("{}", reconciler.device_size(&device).await?);
        }
    }

    Ok(())
}
