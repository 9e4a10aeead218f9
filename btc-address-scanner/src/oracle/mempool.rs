//! mempool.space address API, the last-resort provider.
//!
//! Only answers one address per call (`GET /api/address/{address}`), so a
//! batch is walked sequentially with a pause between calls to stay inside
//! the public rate limit. One failed address fails the whole batch; it is
//! never guessed.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::{collections::HashMap, time::Duration};
use tracing::debug;

use super::UsageProvider;

/// Single-address provider backed by mempool.space.
pub struct MempoolProvider {
    client: reqwest::Client,
    base_url: String,
    politeness_delay: Duration,
}

#[derive(Debug, Deserialize)]
struct AddressStats {
    chain_stats: TxStats,
    mempool_stats: TxStats,
}

#[derive(Debug, Deserialize)]
struct TxStats {
    tx_count: u64,
}

impl AddressStats {
    fn is_used(&self) -> bool {
        self.chain_stats.tx_count + self.mempool_stats.tx_count > 0
    }
}

impl MempoolProvider {
    /// Create a provider against `base_url` (e.g. `https://mempool.space`).
    pub fn new(client: reqwest::Client, base_url: &str, politeness_delay: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            politeness_delay,
        }
    }

    async fn check_one(&self, address: &str) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/api/address/{}", self.base_url, address))
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;

        if !response.status().is_success() {
            bail!("HTTP error: {}", response.status());
        }

        let stats: AddressStats = response
            .json()
            .await
            .map_err(reqwest::Error::without_url)?;
        Ok(stats.is_used())
    }
}

#[async_trait]
impl UsageProvider for MempoolProvider {
    fn name(&self) -> &str {
        "mempool.space"
    }

    async fn check_batch(&self, addresses: &[String]) -> Result<HashMap<String, bool>> {
        let mut usage = HashMap::with_capacity(addresses.len());

        for (i, address) in addresses.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.politeness_delay).await;
            }

            let used = self
                .check_one(address)
                .await
                .with_context(|| format!("address {} of {}", i + 1, addresses.len()))?;
            usage.insert(address.clone(), used);
        }

        debug!("mempool.space checked {} addresses", addresses.len());
        Ok(usage)
    }
}
