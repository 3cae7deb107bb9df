use alloy::primitives::{address, b256, Address, B256};

/// Tracing target shared across the crate.
pub const TARGET: &str = "indexer";

/// Polymarket CTF Exchange on Polygon.
pub const CTF_EXCHANGE: Address = address!("4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E");

/// Polymarket Neg Risk CTF Exchange on Polygon.
pub const NEG_RISK_CTF_EXCHANGE: Address = address!("C5d563A36AE78145C45a50134d48A1215220f80a");

/// keccak256("OrderFilled(bytes32,address,address,uint256,uint256,uint256,uint256,uint256)")
pub const ORDER_FILLED_TOPIC: B256 =
    b256!("d0a08e8c493f9c94f29311604c9de1b4e8c8d4c06bd0c789af57f2d65bfec0f6");

/// USDC.e on Polygon, the collateral token for every Polymarket market.
pub const USDC_ADDRESS: Address = address!("2791Bca1f2de4661ED88A30C99A7a9449Aa84174");

/// Key of the scanner's row in sync_state.
pub const SYNC_KEY: &str = "indexer";

/// Blocks per getLogs call. Public Polygon RPCs cap the response size,
/// so the window stays narrow.
pub const DEFAULT_BATCH_SIZE: u64 = 50;

/// Polygon block interval in seconds, used as the live polling cadence.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

/// How far behind the head a fresh database starts scanning.
pub const DEFAULT_BACKFILL_BLOCKS: u64 = 1000;
