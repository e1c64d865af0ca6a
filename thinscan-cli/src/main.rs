use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use thinscan_core::{Config, TargetSelection};

mod commands;
mod shutdown;

#[derive(Parser)]
#[command(name = "thinscan")]
#[command(
    about = "Mount and scan images and containers stored in a device-mapper thin pool",
    long_about = None
)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(short = 'l', long = "logfile", global = true)]
    logfile: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct MountArgs {
    /// Directory under which thin devices are mounted
    #[arg(long)]
    mount_root: Option<PathBuf>,

    /// Reuse an existing mount directory
    #[arg(long = "override")]
    override_path: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan images and containers
    Scan {
        /// Image or container IDs, names or name:tag
        targets: Vec<String>,

        /// Scan all top-level images
        #[arg(long, conflicts_with_all = ["allimages", "onlyactive", "allcontainers"])]
        images: bool,

        /// Scan all images, intermediate layers included
        #[arg(long, conflicts_with_all = ["onlyactive", "allcontainers"])]
        allimages: bool,

        /// Scan running containers
        #[arg(long, conflicts_with = "allcontainers")]
        onlyactive: bool,

        /// Scan all containers
        #[arg(long)]
        allcontainers: bool,

        /// Number of parallel workers (clamped to 2-4)
        #[arg(short = 'n', long)]
        number: Option<usize>,

        #[command(flatten)]
        mount: MountArgs,

        /// Print the full run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show what an identifier resolves to
    Resolve {
        /// Image or container ID, name or name:tag
        target: String,

        #[arg(long)]
        json: bool,
    },

    /// Mount an image or container read-only and leave it mounted
    Mount {
        /// Image or container ID, name or name:tag
        target: String,

        #[command(flatten)]
        mount: MountArgs,

        #[arg(long)]
        json: bool,
    },

    /// Tear down a mount created by `thinscan mount`
    Unmount {
        /// Mount path, e.g. /mnt/thin-<id>-<prefix>
        path: PathBuf,
    },
}

impl MountArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(root) = &self.mount_root {
            config.mount_root = root.clone();
        }
        if self.override_path {
            config.override_mount_path = true;
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_default().context("Failed to load config")?,
    };

    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(file) = &cli.logfile {
        config.log_file = Some(file.clone());
    }
    match &cli.command {
        Commands::Scan { mount, number, .. } => {
            mount.apply(&mut config);
            if number.is_some() {
                config.concurrency = *number;
            }
        }
        Commands::Mount { mount, .. } => mount.apply(&mut config),
        _ => {}
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    thinscan_core::init_observability(&config.log_level, config.log_file.as_deref())
        .context("Failed to initialize logging")?;

    let ctx = commands::Context::new(config);

    match cli.command {
        Commands::Scan { targets, images, allimages, onlyactive, allcontainers, number, json, .. } => {
            let selection = if images {
                TargetSelection::Images
            } else if allimages {
                TargetSelection::AllImages
            } else if onlyactive {
                TargetSelection::OnlyActive
            } else if allcontainers {
                TargetSelection::AllContainers
            } else {
                TargetSelection::Explicit(targets)
            };
            commands::scan(&ctx, selection, number, json).await?;
        }

        Commands::Resolve { target, json } => {
            commands::resolve(&ctx, &target, json).await?;
        }

        Commands::Mount { target, json, .. } => {
            commands::mount(&ctx, &target, json).await?;
        }

        Commands::Unmount { path } => {
            commands::unmount(&ctx, &path).await?;
        }
    }

    Ok(())
}
