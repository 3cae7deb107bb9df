//! SQLite-backed trade store.
//!
//! All writes are idempotent: trades dedup on (tx_hash, log_index), markets
//! upsert on condition_id, and the sync cursor never moves backwards. A
//! batch of trades and the cursor that covers them commit in one
//! transaction, trades first.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::constants::{SYNC_KEY, TARGET};
use crate::event::Trade;
use crate::schema::SCHEMA_SQL;

/// Market linkage attached to a trade during enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketLink {
    pub slug: Option<String>,
    pub condition_id: String,
    pub outcome: String,
}

/// A decoded trade ready for persistence.
#[derive(Debug, Clone)]
pub struct StoredTrade {
    pub trade: Trade,
    pub link: Option<MarketLink>,
}

#[derive(Debug, Clone, Default)]
pub struct MarketRecord {
    pub condition_id: String,
    pub slug: Option<String>,
    pub question: Option<String>,
    pub yes_token_id: Option<String>,
    pub no_token_id: Option<String>,
    pub oracle: Option<String>,
    pub collateral_token: String,
    pub status: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncState {
    pub last_block: u64,
    pub total_trades: u64,
}

#[derive(Debug, Clone, Default)]
pub struct OverallStats {
    pub markets: u64,
    pub trades: u64,
    pub linked_trades: u64,
    pub sync: SyncState,
}

#[derive(Debug, Clone, Default)]
pub struct MarketStats {
    pub trades: u64,
    pub min_price: Option<f64>,
    pub avg_price: Option<f64>,
    pub max_price: Option<f64>,
    pub first_seen: Option<String>,
    pub last_seen: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TradeRow {
    pub tx_hash: String,
    pub log_index: u64,
    pub block_number: u64,
    pub side: String,
    pub price: String,
    pub token_id: String,
    pub market_slug: Option<String>,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let conn =
            Connection::open(path).with_context(|| format!("opening database at {path}"))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        conn.execute(
            "INSERT OR IGNORE INTO sync_state (key, last_block, total_trades, updated_at)
             VALUES (?1, 0, 0, ?2)",
            params![SYNC_KEY, now()],
        )?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub(crate) fn raw_connection(&self) -> &Connection {
        &self.conn
    }

    /// Insert trades, skipping any already present. Returns the count
    /// actually inserted.
    pub fn insert_trades(&mut self, trades: &[StoredTrade]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let inserted = insert_trades_tx(&tx, trades)?;
        tx.commit()?;
        Ok(inserted)
    }

    /// Persist a batch and advance the cursor in one transaction. Trades
    /// become durable strictly before the cursor that covers them.
    pub fn apply_batch(&mut self, trades: &[StoredTrade], last_block: u64) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let inserted = insert_trades_tx(&tx, trades)?;
        tx.execute(
            "UPDATE sync_state
             SET last_block = MAX(last_block, ?1),
                 total_trades = total_trades + ?2,
                 updated_at = ?3
             WHERE key = ?4",
            params![last_block as i64, inserted as i64, now(), SYNC_KEY],
        )?;
        tx.commit()?;
        Ok(inserted)
    }

    /// Full-overwrite upsert keyed on condition_id. Returns the stable rowid.
    pub fn upsert_market(&mut self, market: &MarketRecord) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO markets (condition_id, slug, question, yes_token_id, no_token_id,
                                  oracle, collateral_token, status, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (condition_id) DO UPDATE SET
                 slug = excluded.slug,
                 question = excluded.question,
                 yes_token_id = excluded.yes_token_id,
                 no_token_id = excluded.no_token_id,
                 oracle = excluded.oracle,
                 collateral_token = excluded.collateral_token,
                 status = excluded.status,
                 updated_at = excluded.updated_at",
            params![
                market.condition_id,
                market.slug,
                market.question,
                market.yes_token_id,
                market.no_token_id,
                market.oracle,
                market.collateral_token,
                market.status,
                now(),
            ],
        )?;
        let rowid = self.conn.query_row(
            "SELECT rowid FROM markets WHERE condition_id = ?1",
            params![market.condition_id],
            |row| row.get(0),
        )?;
        Ok(rowid)
    }

    /// Token id → market linkage for both outcome columns.
    pub fn token_to_market(&self) -> Result<HashMap<String, MarketLink>> {
        let mut stmt = self.conn.prepare(
            "SELECT slug, condition_id, yes_token_id, no_token_id FROM markets
             WHERE yes_token_id IS NOT NULL OR no_token_id IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut index = HashMap::new();
        for row in rows {
            let (slug, condition_id, yes, no) = row?;
            if let Some(token) = yes {
                index.insert(
                    token,
                    MarketLink {
                        slug: slug.clone(),
                        condition_id: condition_id.clone(),
                        outcome: "YES".to_string(),
                    },
                );
            }
            if let Some(token) = no {
                index.insert(
                    token,
                    MarketLink {
                        slug,
                        condition_id,
                        outcome: "NO".to_string(),
                    },
                );
            }
        }
        debug!(target: TARGET, tokens = index.len(), "token index rebuilt");
        Ok(index)
    }

    pub fn sync_state(&self) -> Result<SyncState> {
        let (last_block, total_trades) = self.conn.query_row(
            "SELECT last_block, total_trades FROM sync_state WHERE key = ?1",
            params![SYNC_KEY],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;
        Ok(SyncState {
            last_block: last_block as u64,
            total_trades: total_trades as u64,
        })
    }

    /// Absolute cursor write. A stale writer can never move it backwards.
    pub fn set_sync_state(&mut self, last_block: u64, total_trades: u64) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_state SET last_block = ?1, total_trades = ?2, updated_at = ?3
             WHERE key = ?4 AND last_block <= ?1",
            params![last_block as i64, total_trades as i64, now(), SYNC_KEY],
        )?;
        Ok(())
    }

    pub fn overall_stats(&self) -> Result<OverallStats> {
        let markets: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM markets", [], |row| row.get(0))?;
        let (trades, linked) = self.conn.query_row(
            "SELECT COUNT(*), COUNT(condition_id) FROM trades",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;
        Ok(OverallStats {
            markets: markets as u64,
            trades: trades as u64,
            linked_trades: linked as u64,
            sync: self.sync_state()?,
        })
    }

    pub fn market_stats(&self, condition_id: &str) -> Result<MarketStats> {
        let stats = self.conn.query_row(
            "SELECT COUNT(*),
                    MIN(CAST(price AS REAL)),
                    AVG(CAST(price AS REAL)),
                    MAX(CAST(price AS REAL)),
                    MIN(created_at),
                    MAX(created_at)
             FROM trades WHERE condition_id = ?1",
            params![condition_id],
            |row| {
                Ok(MarketStats {
                    trades: row.get::<_, i64>(0)? as u64,
                    min_price: row.get(1)?,
                    avg_price: row.get(2)?,
                    max_price: row.get(3)?,
                    first_seen: row.get(4)?,
                    last_seen: row.get(5)?,
                })
            },
        )?;
        Ok(stats)
    }

    pub fn condition_for_slug(&self, slug: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT condition_id FROM markets WHERE slug = ?1",
                params![slug],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn trades_for_token(&self, token_id: &str, limit: usize) -> Result<Vec<TradeRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT tx_hash, log_index, block_number, side, price, token_id, market_slug
             FROM trades WHERE token_id = ?1
             ORDER BY block_number DESC, log_index DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![token_id, limit as i64], |row| {
            Ok(TradeRow {
                tx_hash: row.get(0)?,
                log_index: row.get::<_, i64>(1)? as u64,
                block_number: row.get::<_, i64>(2)? as u64,
                side: row.get(3)?,
                price: row.get(4)?,
                token_id: row.get(5)?,
                market_slug: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn insert_trades_tx(conn: &Connection, trades: &[StoredTrade]) -> Result<usize> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO trades
            (tx_hash, log_index, block_number, exchange, order_hash, maker, taker,
             maker_asset_id, taker_asset_id, maker_amount, taker_amount, fee,
             price, token_id, side, market_slug, condition_id, outcome, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                 ?16, ?17, ?18, ?19)",
    )?;
    let created_at = now();
    let mut inserted = 0;
    for entry in trades {
        let trade = &entry.trade;
        let link = entry.link.as_ref();
        inserted += stmt.execute(params![
            trade.tx_hash,
            trade.log_index as i64,
            trade.block_number as i64,
            trade.exchange,
            trade.order_hash,
            trade.maker,
            trade.taker,
            trade.maker_asset_id,
            trade.taker_asset_id,
            trade.maker_amount,
            trade.taker_amount,
            trade.fee,
            trade.price,
            trade.token_id,
            trade.side.as_str(),
            link.and_then(|l| l.slug.as_deref()),
            link.map(|l| l.condition_id.as_str()),
            link.map(|l| l.outcome.as_str()),
            created_at,
        ])?;
    }
    Ok(inserted)
}

fn now() -> String {
    Utc::now().to_rfc3339()
}
