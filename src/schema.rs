//! SQLite schema for markets, trades and the sync cursor.

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS markets (
    condition_id     TEXT PRIMARY KEY,
    slug             TEXT UNIQUE,
    question         TEXT,
    yes_token_id     TEXT,
    no_token_id      TEXT,
    oracle           TEXT,
    collateral_token TEXT NOT NULL DEFAULT '0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174',
    status           TEXT NOT NULL DEFAULT 'active',
    updated_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS trades (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    tx_hash        TEXT NOT NULL,
    log_index      INTEGER NOT NULL,
    block_number   INTEGER NOT NULL,
    exchange       TEXT NOT NULL,
    order_hash     TEXT NOT NULL,
    maker          TEXT NOT NULL,
    taker          TEXT NOT NULL,
    maker_asset_id TEXT NOT NULL,
    taker_asset_id TEXT NOT NULL,
    maker_amount   TEXT NOT NULL,
    taker_amount   TEXT NOT NULL,
    fee            TEXT NOT NULL,
    price          TEXT NOT NULL,
    token_id       TEXT NOT NULL,
    side           TEXT NOT NULL,
    market_slug    TEXT,
    condition_id   TEXT,
    outcome        TEXT,
    created_at     TEXT NOT NULL,
    UNIQUE (tx_hash, log_index)
);

CREATE TABLE IF NOT EXISTS sync_state (
    key          TEXT PRIMARY KEY,
    last_block   INTEGER NOT NULL DEFAULT 0,
    total_trades INTEGER NOT NULL DEFAULT 0,
    updated_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_trades_block_number ON trades (block_number);
CREATE INDEX IF NOT EXISTS idx_trades_token_id ON trades (token_id);
CREATE INDEX IF NOT EXISTS idx_trades_maker ON trades (maker);
CREATE INDEX IF NOT EXISTS idx_trades_taker ON trades (taker);
CREATE INDEX IF NOT EXISTS idx_trades_condition_id ON trades (condition_id);
CREATE INDEX IF NOT EXISTS idx_markets_yes_token ON markets (yes_token_id);
CREATE INDEX IF NOT EXISTS idx_markets_no_token ON markets (no_token_id);
"#;
