//! Batch scanner: walks block ranges, decodes fills, links them to
//! markets and persists each batch with the cursor in one transaction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::chain::ChainSource;
use crate::constants::{DEFAULT_BACKFILL_BLOCKS, DEFAULT_BATCH_SIZE, DEFAULT_POLL_INTERVAL_SECS, TARGET};
use crate::event;
use crate::store::{Store, StoredTrade};
use crate::tps_counter::TpsCounter;

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Blocks per getLogs call.
    pub batch_size: u64,
    /// Head polling cadence while following.
    pub poll_interval: Duration,
    /// Retries per failed batch before giving up.
    pub max_retries: u32,
    /// Base delay of the retry backoff.
    pub retry_delay: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanSummary {
    pub start_block: u64,
    pub end_block: u64,
    pub batches: u64,
    pub logs_fetched: u64,
    pub trades_decoded: u64,
    pub trades_stored: u64,
}

impl ScanSummary {
    fn absorb(&mut self, other: ScanSummary) {
        self.end_block = self.end_block.max(other.end_block);
        self.batches += other.batches;
        self.logs_fetched += other.logs_fetched;
        self.trades_decoded += other.trades_decoded;
        self.trades_stored += other.trades_stored;
    }
}

struct BatchOutcome {
    logs: usize,
    decoded: usize,
    stored: usize,
}

pub struct Scanner<C> {
    chain: C,
    store: Store,
    config: ScannerConfig,
    shutdown: Arc<AtomicBool>,
    counter: Option<Arc<Mutex<TpsCounter>>>,
}

impl<C: ChainSource> Scanner<C> {
    pub fn new(
        chain: C,
        store: Store,
        mut config: ScannerConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        // a zero width would never advance the batch loop
        config.batch_size = config.batch_size.max(1);
        Self {
            chain,
            store,
            config,
            shutdown,
            counter: None,
        }
    }

    pub fn with_counter(mut self, counter: Arc<Mutex<TpsCounter>>) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Catch up from the resolved start block, then optionally follow the
    /// head. Start resolution: explicit override, else stored cursor + 1,
    /// else a short backfill behind the head.
    pub async fn run(
        &mut self,
        from_block: Option<u64>,
        to_block: Option<u64>,
        continuous: bool,
    ) -> Result<ScanSummary> {
        let state = self.store.sync_state()?;
        let mut height = self.chain.current_height().await?;
        let from = match from_block {
            Some(from) => from,
            None if state.last_block > 0 => state.last_block + 1,
            None => height.saturating_sub(DEFAULT_BACKFILL_BLOCKS),
        };
        let mut target = to_block.unwrap_or(height);

        let mut summary = ScanSummary {
            start_block: from,
            end_block: from.saturating_sub(1),
            ..Default::default()
        };
        let mut cursor = from;
        loop {
            if cursor > target || self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            info!(target: TARGET, from = cursor, to = target, "catching up");
            match self.run_catchup(cursor, target).await {
                Ok(pass) => summary.absorb(pass),
                // the live loop re-reads the cursor and retries the gap
                Err(err) if continuous => {
                    warn!(target: TARGET, error = %err, "catchup pass failed, continuing live from the cursor");
                    break;
                }
                Err(err) => return Err(err),
            }
            if to_block.is_some() || self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            // the head keeps moving while a pass runs
            height = self.chain.current_height().await?;
            if height <= target {
                break;
            }
            cursor = target + 1;
            target = height;
        }
        info!(
            target: TARGET,
            stored = summary.trades_stored,
            last_block = summary.end_block,
            "catchup complete"
        );

        if continuous && !self.shutdown.load(Ordering::SeqCst) {
            self.run_live().await?;
        }
        Ok(summary)
    }

    /// Walk [from, to] in bounded batches. Stops between batches when the
    /// shutdown flag is raised; the cursor always reflects the last batch
    /// that was fully stored.
    pub async fn run_catchup(&mut self, from: u64, to: u64) -> Result<ScanSummary> {
        let mut summary = ScanSummary {
            start_block: from,
            end_block: from.saturating_sub(1),
            ..Default::default()
        };
        let mut batch_start = from;
        while batch_start <= to {
            if self.shutdown.load(Ordering::SeqCst) {
                info!(target: TARGET, next = batch_start, "interrupt observed, stopping between batches");
                break;
            }
            let batch_end = (batch_start + self.config.batch_size - 1).min(to);
            let outcome = self.run_batch_with_retry(batch_start, batch_end).await?;
            summary.batches += 1;
            summary.logs_fetched += outcome.logs as u64;
            summary.trades_decoded += outcome.decoded as u64;
            summary.trades_stored += outcome.stored as u64;
            summary.end_block = batch_end;
            batch_start = batch_end + 1;
        }
        Ok(summary)
    }

    /// Follow the head: each tick re-reads the cursor and applies the gap
    /// as bounded batches. Failures skip to the next tick.
    pub async fn run_live(&mut self) -> Result<()> {
        info!(target: TARGET, "entering live mode");
        let mut interval = time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if self.shutdown.load(Ordering::SeqCst) {
                info!(target: TARGET, "live loop stopped");
                return Ok(());
            }
            let last = match self.store.sync_state() {
                Ok(state) => state.last_block,
                Err(err) => {
                    warn!(target: TARGET, error = %err, "cursor read failed, skipping cycle");
                    continue;
                }
            };
            let height = match self.chain.current_height().await {
                Ok(height) => height,
                Err(err) => {
                    warn!(target: TARGET, error = %err, "head check failed, skipping cycle");
                    continue;
                }
            };
            if height <= last {
                continue;
            }
            if height - last > self.config.batch_size {
                if let Ok(Some(timestamp)) = self.chain.block_timestamp(height).await {
                    debug!(target: TARGET, height, %timestamp, behind = height - last, "head moved ahead of the cursor");
                }
            }

            let mut batch_start = last + 1;
            while batch_start <= height {
                if self.shutdown.load(Ordering::SeqCst) {
                    info!(target: TARGET, "live loop stopped");
                    return Ok(());
                }
                let batch_end = (batch_start + self.config.batch_size - 1).min(height);
                match self.run_batch(batch_start, batch_end).await {
                    Ok(_) => batch_start = batch_end + 1,
                    Err(err) => {
                        warn!(
                            target: TARGET,
                            from = batch_start,
                            to = batch_end,
                            error = %err,
                            "live cycle failed, retrying next tick"
                        );
                        break;
                    }
                }
            }
        }
    }

    async fn run_batch_with_retry(&mut self, from: u64, to: u64) -> Result<BatchOutcome> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.run_batch(from, to).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if attempt <= self.config.max_retries => {
                    warn!(
                        target: TARGET,
                        from,
                        to,
                        attempt,
                        error = %err,
                        "batch failed, retrying at the same boundaries"
                    );
                    time::sleep(self.config.retry_delay * attempt).await;
                }
                Err(err) => {
                    return Err(err.context(format!(
                        "batch {from}-{to} failed after {attempt} attempts"
                    )))
                }
            }
        }
    }

    /// FETCH, DECODE, ENRICH, STORE, ADVANCE for one block range. The
    /// cursor only moves once the batch's trades are durable.
    async fn run_batch(&mut self, from: u64, to: u64) -> Result<BatchOutcome> {
        let logs = self
            .chain
            .logs(from, to)
            .await
            .with_context(|| format!("fetching logs for blocks {from}-{to}"))?;

        let mut trades = Vec::with_capacity(logs.len());
        for log in &logs {
            match event::decode_order_filled(log) {
                Ok(trade) => trades.push(trade),
                // rejected logs are skipped, never fatal
                Err(err) => debug!(
                    target: TARGET,
                    tx = %log.tx_hash,
                    log_index = log.log_index,
                    error = %err,
                    "skipping undecodable log"
                ),
            }
        }
        let decoded = trades.len();

        let index = self.store.token_to_market()?;
        let enriched: Vec<StoredTrade> = trades
            .into_iter()
            .map(|trade| {
                let link = index.get(&trade.token_id).cloned();
                StoredTrade { trade, link }
            })
            .collect();

        let stored = self.store.apply_batch(&enriched, to)?;
        if let Some(counter) = &self.counter {
            counter.lock().unwrap().add(stored as u64);
        }
        if stored > 0 {
            info!(
                target: TARGET,
                from,
                to,
                logs = logs.len(),
                decoded,
                stored,
                "batch stored"
            );
        }
        Ok(BatchOutcome {
            logs: logs.len(),
            decoded,
            stored,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::RawLog;
    use crate::constants::{CTF_EXCHANGE, ORDER_FILLED_TOPIC};
    use crate::store::MarketRecord;
    use alloy::primitives::{B256, U256};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex as StdMutex;

    struct FixtureChain {
        height: u64,
        logs: Vec<RawLog>,
        fetched: StdMutex<Vec<(u64, u64)>>,
        fail_next: StdMutex<u32>,
        trip_after: StdMutex<u32>,
        trip: Option<Arc<AtomicBool>>,
    }

    impl FixtureChain {
        fn new(height: u64, logs: Vec<RawLog>) -> Self {
            Self {
                height,
                logs,
                fetched: StdMutex::new(Vec::new()),
                fail_next: StdMutex::new(0),
                trip_after: StdMutex::new(0),
                trip: None,
            }
        }
    }

    #[async_trait]
    impl ChainSource for FixtureChain {
        async fn current_height(&self) -> Result<u64> {
            Ok(self.height)
        }

        async fn logs(&self, from_block: u64, to_block: u64) -> Result<Vec<RawLog>> {
            {
                let mut fail = self.fail_next.lock().unwrap();
                if *fail > 0 {
                    *fail -= 1;
                    return Err(anyhow!("simulated endpoint error"));
                }
            }
            self.fetched.lock().unwrap().push((from_block, to_block));
            if let Some(flag) = &self.trip {
                let mut left = self.trip_after.lock().unwrap();
                if *left > 0 {
                    *left -= 1;
                    if *left == 0 {
                        flag.store(true, Ordering::SeqCst);
                    }
                }
            }
            Ok(self
                .logs
                .iter()
                .filter(|log| log.block_number >= from_block && log.block_number <= to_block)
                .cloned()
                .collect())
        }

        async fn block_timestamp(&self, _height: u64) -> Result<Option<DateTime<Utc>>> {
            Ok(None)
        }
    }

    fn buy_fill(block: u64, tx_byte: u8, token: u64) -> RawLog {
        let mut data = Vec::with_capacity(160);
        for value in [
            U256::ZERO,
            U256::from(token),
            U256::from(750_000u64),
            U256::from(1u64),
            U256::ZERO,
        ] {
            data.extend_from_slice(&value.to_be_bytes::<32>());
        }
        RawLog {
            address: CTF_EXCHANGE,
            topics: vec![
                ORDER_FILLED_TOPIC,
                B256::with_last_byte(0x01),
                B256::with_last_byte(0x02),
                B256::with_last_byte(0x03),
            ],
            data,
            tx_hash: B256::with_last_byte(tx_byte),
            log_index: 0,
            block_number: block,
        }
    }

    fn junk_log(block: u64, tx_byte: u8) -> RawLog {
        let mut log = buy_fill(block, tx_byte, 1);
        log.topics[0] = B256::with_last_byte(0xff);
        log
    }

    fn test_config(batch_size: u64) -> ScannerConfig {
        ScannerConfig {
            batch_size,
            poll_interval: Duration::from_millis(1),
            max_retries: 2,
            retry_delay: Duration::from_millis(1),
        }
    }

    fn scanner(chain: FixtureChain, batch_size: u64) -> Scanner<FixtureChain> {
        Scanner::new(
            chain,
            Store::open_in_memory().unwrap(),
            test_config(batch_size),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[tokio::test]
    async fn catchup_replay_stores_nothing_new() {
        let logs = vec![
            buy_fill(100, 0xa1, 111),
            buy_fill(110, 0xa2, 111),
            junk_log(115, 0xa3),
            buy_fill(120, 0xa4, 222),
        ];
        let mut scanner = scanner(FixtureChain::new(150, logs), 20);

        let first = scanner.run_catchup(100, 150).await.unwrap();
        assert_eq!(first.logs_fetched, 4);
        assert_eq!(first.trades_decoded, 3);
        assert_eq!(first.trades_stored, 3);
        assert_eq!(scanner.store().sync_state().unwrap().last_block, 150);
        assert_eq!(scanner.store().sync_state().unwrap().total_trades, 3);

        let second = scanner.run_catchup(100, 150).await.unwrap();
        assert_eq!(second.trades_stored, 0);
        assert_eq!(scanner.store().sync_state().unwrap().total_trades, 3);
    }

    #[tokio::test]
    async fn resumes_after_the_stored_cursor() {
        let mut scanner = scanner(FixtureChain::new(150, vec![buy_fill(130, 0xb1, 111)]), 20);
        scanner.store.set_sync_state(124, 0).unwrap();

        let summary = scanner.run(None, Some(150), false).await.unwrap();
        assert_eq!(summary.start_block, 125);
        assert_eq!(summary.trades_stored, 1);

        let fetched = scanner.chain.fetched.lock().unwrap().clone();
        assert!(!fetched.is_empty());
        assert!(fetched.iter().all(|(from, _)| *from >= 125));
        assert_eq!(fetched[0].0, 125);
    }

    #[tokio::test]
    async fn fresh_database_backfills_behind_the_head() {
        let mut scanner = scanner(FixtureChain::new(5000, vec![]), 50);
        scanner.run(None, Some(4099), false).await.unwrap();
        let fetched = scanner.chain.fetched.lock().unwrap().clone();
        assert_eq!(fetched[0].0, 4000);
    }

    #[tokio::test]
    async fn failed_batch_retries_at_the_same_boundaries() {
        let chain = FixtureChain::new(150, vec![buy_fill(105, 0xc1, 111)]);
        *chain.fail_next.lock().unwrap() = 1;
        let mut scanner = scanner(chain, 20);

        let summary = scanner.run_catchup(100, 109).await.unwrap();
        assert_eq!(summary.trades_stored, 1);
        assert_eq!(
            scanner.chain.fetched.lock().unwrap().clone(),
            vec![(100, 109)]
        );
        assert_eq!(scanner.store().sync_state().unwrap().last_block, 109);
    }

    #[tokio::test]
    async fn exhausted_retries_leave_the_cursor_alone() {
        let chain = FixtureChain::new(150, vec![]);
        *chain.fail_next.lock().unwrap() = 10;
        let mut scanner = scanner(chain, 20);

        assert!(scanner.run_catchup(100, 109).await.is_err());
        assert_eq!(scanner.store().sync_state().unwrap().last_block, 0);
    }

    #[tokio::test]
    async fn trades_link_to_known_markets() {
        let chain = FixtureChain::new(150, vec![
            buy_fill(100, 0xd1, 111),
            buy_fill(101, 0xd2, 999),
        ]);
        let mut store = Store::open_in_memory().unwrap();
        store
            .upsert_market(&MarketRecord {
                condition_id: "0xc1".to_string(),
                slug: Some("m1".to_string()),
                question: None,
                yes_token_id: Some("111".to_string()),
                no_token_id: Some("222".to_string()),
                oracle: None,
                collateral_token: String::new(),
                status: "active".to_string(),
            })
            .unwrap();
        let mut scanner = Scanner::new(
            chain,
            store,
            test_config(50),
            Arc::new(AtomicBool::new(false)),
        );

        scanner.run_catchup(100, 101).await.unwrap();
        let stats = scanner.store().overall_stats().unwrap();
        assert_eq!(stats.trades, 2);
        assert_eq!(stats.linked_trades, 1);
        let linked = scanner.store().trades_for_token("111", 10).unwrap();
        assert_eq!(linked[0].market_slug.as_deref(), Some("m1"));
        let unlinked = scanner.store().trades_for_token("999", 10).unwrap();
        assert!(unlinked[0].market_slug.is_none());
    }

    #[tokio::test]
    async fn interrupt_stops_between_batches_and_resume_leaves_no_gaps() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let logs = vec![
            buy_fill(102, 0xe1, 111),
            buy_fill(117, 0xe2, 111),
            buy_fill(143, 0xe3, 111),
        ];
        let mut chain = FixtureChain::new(159, logs);
        chain.trip = Some(shutdown.clone());
        *chain.trip_after.lock().unwrap() = 1;
        let mut scanner = Scanner::new(
            chain,
            Store::open_in_memory().unwrap(),
            test_config(10),
            shutdown.clone(),
        );

        scanner.run_catchup(100, 159).await.unwrap();
        assert_eq!(scanner.chain.fetched.lock().unwrap().len(), 1);
        assert_eq!(scanner.store().sync_state().unwrap().last_block, 109);

        shutdown.store(false, Ordering::SeqCst);
        scanner.run(None, Some(159), false).await.unwrap();
        assert_eq!(scanner.store().sync_state().unwrap().last_block, 159);
        assert_eq!(scanner.store().sync_state().unwrap().total_trades, 3);

        let fetched = scanner.chain.fetched.lock().unwrap().clone();
        assert!(fetched[1..].iter().all(|(from, _)| *from >= 110));
    }

    #[tokio::test]
    async fn zero_batch_width_is_clamped() {
        let mut scanner = scanner(FixtureChain::new(150, vec![]), 0);
        scanner.run_catchup(100, 102).await.unwrap();
        assert_eq!(
            scanner.chain.fetched.lock().unwrap().clone(),
            vec![(100, 100), (101, 101), (102, 102)]
        );
        assert_eq!(scanner.store().sync_state().unwrap().last_block, 102);
    }

    #[tokio::test]
    async fn live_loop_survives_a_cursor_read_failure() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut scanner = Scanner::new(
            FixtureChain::new(120, vec![]),
            Store::open_in_memory().unwrap(),
            test_config(10),
            shutdown.clone(),
        );
        scanner
            .store
            .raw_connection()
            .execute_batch("DROP TABLE sync_state")
            .unwrap();

        let stopper = shutdown.clone();
        let stop = tokio::spawn(async move {
            time::sleep(Duration::from_millis(20)).await;
            stopper.store(true, Ordering::SeqCst);
        });

        // broken cursor reads skip cycles instead of ending the loop
        scanner.run_live().await.unwrap();
        assert!(scanner.chain.fetched.lock().unwrap().is_empty());
        stop.await.unwrap();
    }

    #[tokio::test]
    async fn live_cycle_applies_the_gap_in_bounded_batches() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut chain = FixtureChain::new(120, vec![buy_fill(105, 0xf1, 111)]);
        chain.trip = Some(shutdown.clone());
        *chain.trip_after.lock().unwrap() = 1;
        let mut scanner = Scanner::new(
            chain,
            Store::open_in_memory().unwrap(),
            test_config(10),
            shutdown,
        );
        scanner.store.set_sync_state(100, 0).unwrap();

        scanner.run_live().await.unwrap();
        assert_eq!(
            scanner.chain.fetched.lock().unwrap().clone(),
            vec![(101, 110)]
        );
        let state = scanner.store().sync_state().unwrap();
        assert_eq!(state.last_block, 110);
        assert_eq!(state.total_trades, 1);
    }
}
