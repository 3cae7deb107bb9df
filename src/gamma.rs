//! Gamma catalog client: market metadata used to link trades.

use std::str::FromStr;

use alloy::primitives::B256;
use anyhow::Result;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::constants::{TARGET, USDC_ADDRESS};
use crate::store::{MarketRecord, Store};
use crate::tokens;

pub struct GammaClient {
    base_url: String,
    http: reqwest::Client,
}

/// Catalog market response, subset of fields we need. `clobTokenIds`
/// arrives as a JSON-encoded string array, not a JSON array.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GammaMarket {
    #[serde(default)]
    pub condition_id: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub clob_token_ids: Option<String>,
    #[serde(default)]
    pub market_maker_address: Option<String>,
    #[serde(default)]
    pub closed: Option<bool>,
}

impl GammaClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    /// Currently active markets, newest first.
    pub async fn list_active_markets(&self, limit: usize) -> Result<Vec<GammaMarket>> {
        let url = format!(
            "{}/markets?active=true&closed=false&limit={}",
            self.base_url, limit
        );
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("Gamma API returned status {}", resp.status());
        }
        Ok(resp.json().await?)
    }
}

/// Upsert a snapshot of active markets so trades from the next batch can
/// be linked. Token ids missing from the catalog fall back to the
/// deterministic derivation.
pub async fn sync_markets(store: &mut Store, client: &GammaClient, limit: usize) -> Result<usize> {
    let markets = client.list_active_markets(limit).await?;
    let fetched = markets.len();
    let mut synced = 0;
    for entry in &markets {
        match market_record(entry) {
            Some(record) => {
                store.upsert_market(&record)?;
                synced += 1;
            }
            None => {
                debug!(target: TARGET, condition_id = %entry.condition_id, "skipping catalog entry")
            }
        }
    }
    info!(target: TARGET, synced, fetched, "market catalog sync complete");
    Ok(synced)
}

fn market_record(market: &GammaMarket) -> Option<MarketRecord> {
    if market.condition_id.is_empty() {
        return None;
    }
    let (yes, no) = token_ids(market)?;
    Some(MarketRecord {
        condition_id: market.condition_id.clone(),
        slug: market.slug.clone(),
        question: market.question.clone(),
        yes_token_id: Some(yes),
        no_token_id: Some(no),
        oracle: market.market_maker_address.clone(),
        collateral_token: USDC_ADDRESS.to_string(),
        status: if market.closed.unwrap_or(false) {
            "closed"
        } else {
            "active"
        }
        .to_string(),
    })
}

fn token_ids(market: &GammaMarket) -> Option<(String, String)> {
    if let Some(raw) = &market.clob_token_ids {
        match serde_json::from_str::<Vec<String>>(raw) {
            Ok(ids) if ids.len() >= 2 => return Some((ids[0].clone(), ids[1].clone())),
            _ => {
                warn!(target: TARGET, condition_id = %market.condition_id, "unparseable clobTokenIds, deriving")
            }
        }
    }
    let condition = B256::from_str(&market.condition_id).ok()?;
    let (yes, no) = tokens::derive_token_ids(condition);
    Some((yes.to_string(), no.to_string()))
}
