use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use clap::Parser;
use tokio::time::{self, Duration};
use tracing::{info, warn};

use configs::{init_logging, Opts, RunConfigArgs, StatsArgs, SubCommand, SyncMarketsArgs};
use constants::{CTF_EXCHANGE, NEG_RISK_CTF_EXCHANGE, TARGET};

mod chain;
mod configs;
mod constants;
mod event;
mod gamma;
mod schema;
mod store;
mod tokens;
mod tps_counter;
mod worker;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let opts: Opts = Opts::parse();

    match opts.subcmd {
        SubCommand::Run(cli_config) => run(cli_config).await,
        SubCommand::SyncMarkets(cli_config) => sync_markets(cli_config).await,
        SubCommand::Stats(cli_config) => stats(cli_config),
    }
}

async fn run(cli_config: RunConfigArgs) -> Result<()> {
    info!(target: TARGET, db = %cli_config.db, "opening trade store");
    let mut store = store::Store::open(&cli_config.db)?;

    if !cli_config.no_sync_markets {
        let client = gamma::GammaClient::new(cli_config.gamma_url.clone());
        if let Err(err) = gamma::sync_markets(&mut store, &client, cli_config.market_limit).await {
            warn!(
                target: TARGET,
                error = %err,
                "market catalog sync failed, trades will be stored unlinked"
            );
        }
    }

    let chain = chain::RpcChainSource::connect(
        &cli_config.rpc_url,
        vec![CTF_EXCHANGE, NEG_RISK_CTF_EXCHANGE],
    )
    .await?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(target: TARGET, "interrupt received, finishing current batch");
            shutdown_flag.store(true, Ordering::SeqCst);
        }
    });

    let wrapped_counter = create_tps_counter();
    let wrapped_counter_copy = wrapped_counter.clone();
    tokio::spawn(async move {
        let mut log_interval = time::interval(Duration::from_secs(30));
        loop {
            log_interval.tick().await;
            let mut counter = wrapped_counter_copy.lock().unwrap();
            tps_counter::lap_and_log_tps(&mut counter);
        }
    });

    let config = worker::ScannerConfig {
        batch_size: cli_config.batch_size,
        poll_interval: Duration::from_secs(cli_config.poll_interval),
        max_retries: cli_config.max_retries,
        ..Default::default()
    };
    let mut scanner =
        worker::Scanner::new(chain, store, config, shutdown).with_counter(wrapped_counter);
    let summary = scanner
        .run(
            cli_config.from_block,
            cli_config.to_block,
            cli_config.continuous,
        )
        .await?;
    info!(
        target: TARGET,
        batches = summary.batches,
        logs = summary.logs_fetched,
        stored = summary.trades_stored,
        last_block = summary.end_block,
        "indexing finished"
    );
    Ok(())
}

async fn sync_markets(cli_config: SyncMarketsArgs) -> Result<()> {
    let mut store = store::Store::open(&cli_config.db)?;
    let client = gamma::GammaClient::new(cli_config.gamma_url);
    let synced = gamma::sync_markets(&mut store, &client, cli_config.market_limit).await?;
    println!("synced {synced} markets");
    Ok(())
}

fn stats(cli_config: StatsArgs) -> Result<()> {
    let store = store::Store::open(&cli_config.db)?;
    match cli_config.slug {
        Some(slug) => match store.condition_for_slug(&slug)? {
            Some(condition_id) => {
                let stats = store.market_stats(&condition_id)?;
                println!("market:    {slug}");
                println!("condition: {condition_id}");
                println!("trades:    {}", stats.trades);
                if let (Some(min), Some(avg), Some(max)) =
                    (stats.min_price, stats.avg_price, stats.max_price)
                {
                    println!("price:     min {min:.6} / avg {avg:.6} / max {max:.6}");
                }
                if let (Some(first), Some(last)) = (stats.first_seen, stats.last_seen) {
                    println!("seen:      {first} .. {last}");
                }
            }
            None => println!("no market with slug {slug}"),
        },
        None => {
            let stats = store.overall_stats()?;
            println!("markets:       {}", stats.markets);
            println!("trades:        {}", stats.trades);
            println!("linked trades: {}", stats.linked_trades);
            println!("last block:    {}", stats.sync.last_block);
            println!("total counted: {}", stats.sync.total_trades);
        }
    }
    Ok(())
}

fn create_tps_counter() -> Arc<Mutex<tps_counter::TpsCounter>> {
    Arc::new(Mutex::new(tps_counter::TpsCounter::default()))
}
