//! `shardscanctl`: run resumable sharded table scans and manage their offsets.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use shardscan_config::ShardscanConfig;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod offsets;
mod scan;
mod wiring;

#[derive(Parser)]
#[command(name = "shardscanctl", about = "Run and inspect resumable sharded table scans")]
struct Cli {
    /// Config file (TOML or JSON). Defaults to $SHARDSCAN_CONFIG_PATH, then
    /// shardscan.toml in the working directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan every shard and print records as JSON lines
    Scan(ScanArgs),
    /// Show or edit the stored per-shard offsets
    Offsets {
        #[command(subcommand)]
        action: Option<OffsetsAction>,
    },
}

#[derive(Args, Debug)]
pub(crate) struct ScanArgs {
    /// Concurrent shard scans
    #[arg(long)]
    pub(crate) workers: Option<usize>,
    /// Only scan the first N shards
    #[arg(long)]
    pub(crate) shards: Option<usize>,
    /// Rows per batch
    #[arg(long)]
    pub(crate) batch_size: Option<usize>,
    /// Keep tailing new rows after every shard is exhausted
    #[arg(long)]
    pub(crate) follow: bool,
    /// Offset written for shards with no stored offset
    #[arg(long)]
    pub(crate) seed: Option<String>,
    /// Print one line per batch instead of one per record
    #[arg(long)]
    pub(crate) summary: bool,
}

#[derive(Subcommand)]
enum OffsetsAction {
    /// Print the stored offset of every shard
    Show,
    /// Overwrite one shard's offset; running scans pick it up when the shard
    /// is next idle
    Set {
        #[arg(long)]
        shard: usize,
        #[arg(long)]
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let (config, source) = ShardscanConfig::load_from_env_or_path(cli.config.as_deref())
        .context("failed to load shardscan configuration")?;
    info!(source = ?source, "using configuration");

    match cli.command {
        Command::Scan(args) => scan::run(config, args).await,
        Command::Offsets { action } => match action.unwrap_or(OffsetsAction::Show) {
            OffsetsAction::Show => offsets::show(&config).await,
            OffsetsAction::Set { shard, value } => offsets::set(&config, shard, &value).await,
        },
    }
}
