use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::constants::{DEFAULT_BATCH_SIZE, DEFAULT_POLL_INTERVAL_SECS};

#[derive(Parser, Debug)]
#[clap(version = "0.1.0", about = "Polymarket on-chain fill indexer")]
pub(crate) struct Opts {
    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Parser, Debug)]
pub(crate) enum SubCommand {
    /// Scan OrderFilled logs and persist trades
    Run(RunConfigArgs),
    /// Refresh market metadata from the Gamma catalog and exit
    SyncMarkets(SyncMarketsArgs),
    /// Print indexing progress and stored-data statistics
    Stats(StatsArgs),
}

#[derive(Parser, Debug)]
pub(crate) struct RunConfigArgs {
    /// Polygon JSON-RPC endpoint
    #[clap(long, env = "RPC_URL", default_value = "https://polygon-rpc.com")]
    pub rpc_url: String,

    /// SQLite database path
    #[clap(long, env = "DB_PATH", default_value = "data/polymarket.db")]
    pub db: String,

    /// First block to scan. Omit to resume from the stored cursor
    #[clap(long)]
    pub from_block: Option<u64>,

    /// Last block to scan. Omit to follow the chain head
    #[clap(long)]
    pub to_block: Option<u64>,

    /// Keep polling for new blocks after catching up
    #[clap(long)]
    pub continuous: bool,

    /// Blocks per getLogs call
    #[clap(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: u64,

    /// Seconds between head checks while following
    #[clap(long, default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    pub poll_interval: u64,

    /// Retries per failed batch before giving up
    #[clap(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Skip the market catalog sync before scanning
    #[clap(long)]
    pub no_sync_markets: bool,

    /// Gamma catalog base URL
    #[clap(long, default_value = "https://gamma-api.polymarket.com")]
    pub gamma_url: String,

    /// Markets to pull from the catalog
    #[clap(long, default_value_t = 100)]
    pub market_limit: usize,
}

#[derive(Parser, Debug)]
pub(crate) struct SyncMarketsArgs {
    /// SQLite database path
    #[clap(long, env = "DB_PATH", default_value = "data/polymarket.db")]
    pub db: String,

    /// Gamma catalog base URL
    #[clap(long, default_value = "https://gamma-api.polymarket.com")]
    pub gamma_url: String,

    /// Markets to pull from the catalog
    #[clap(long, default_value_t = 100)]
    pub market_limit: usize,
}

#[derive(Parser, Debug)]
pub(crate) struct StatsArgs {
    /// SQLite database path
    #[clap(long, env = "DB_PATH", default_value = "data/polymarket.db")]
    pub db: String,

    /// Show one market's summary instead of the overall view
    #[clap(long)]
    pub slug: Option<String>,
}

pub(crate) fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("indexer=info,polymarket_indexer=info"));
    tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}
