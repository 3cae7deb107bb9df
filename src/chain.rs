//! Chain access seam: a narrow trait over the JSON-RPC endpoint so the
//! scanner can run against a fixture in tests.

use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::Filter;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

use crate::constants::{ORDER_FILLED_TOPIC, TARGET};

/// One event log as returned by the endpoint.
#[derive(Debug, Clone)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
}

/// Read-only view of the chain needed by the scanner.
#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn current_height(&self) -> Result<u64>;

    /// OrderFilled logs from the watched exchanges, inclusive range.
    async fn logs(&self, from_block: u64, to_block: u64) -> Result<Vec<RawLog>>;

    /// Best-effort block timestamp, operator logging only.
    async fn block_timestamp(&self, height: u64) -> Result<Option<DateTime<Utc>>>;
}

pub struct RpcChainSource {
    provider: RootProvider,
    addresses: Vec<Address>,
}

impl RpcChainSource {
    pub async fn connect(url: &str, addresses: Vec<Address>) -> Result<Self> {
        let provider = RootProvider::new_http(url.parse().context("invalid RPC URL")?);
        let height = provider
            .get_block_number()
            .await
            .context("RPC endpoint unreachable")?;
        debug!(target: TARGET, height, url, "connected to RPC endpoint");
        Ok(Self { provider, addresses })
    }
}

#[async_trait]
impl ChainSource for RpcChainSource {
    async fn current_height(&self) -> Result<u64> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn logs(&self, from_block: u64, to_block: u64) -> Result<Vec<RawLog>> {
        let filter = Filter::new()
            .address(self.addresses.clone())
            .event_signature(ORDER_FILLED_TOPIC)
            .from_block(from_block)
            .to_block(to_block);
        let logs = self.provider.get_logs(&filter).await?;
        Ok(logs
            .into_iter()
            .filter_map(|log| {
                // pending logs carry no position; only mined ranges are scanned
                let tx_hash = log.transaction_hash?;
                let log_index = log.log_index?;
                let block_number = log.block_number?;
                Some(RawLog {
                    address: log.address(),
                    topics: log.topics().to_vec(),
                    data: log.data().data.to_vec(),
                    tx_hash,
                    log_index,
                    block_number,
                })
            })
            .collect())
    }

    async fn block_timestamp(&self, height: u64) -> Result<Option<DateTime<Utc>>> {
        let block = self.provider.get_block_by_number(height.into()).await?;
        Ok(block.and_then(|b| Utc.timestamp_opt(b.header.timestamp as i64, 0).single()))
    }
}
