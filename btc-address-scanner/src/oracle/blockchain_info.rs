//! blockchain.info balance API.
//!
//! `GET /balance?active=addr1|addr2|...` answers for the whole batch at once:
//!
//! ```text
//! { "bc1q...": { "final_balance": 0, "n_tx": 2, "total_received": 5000 } }
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

use super::UsageProvider;

/// Batch provider backed by blockchain.info.
pub struct BlockchainInfoProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct AddressBalance {
    n_tx: u64,
}

impl BlockchainInfoProvider {
    /// Create a provider against `base_url` (e.g. `https://blockchain.info`).
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl UsageProvider for BlockchainInfoProvider {
    fn name(&self) -> &str {
        "blockchain.info"
    }

    async fn check_batch(&self, addresses: &[String]) -> Result<HashMap<String, bool>> {
        let response = self
            .client
            .get(format!("{}/balance", self.base_url))
            .query(&[("active", addresses.join("|"))])
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;

        if !response.status().is_success() {
            bail!("HTTP error: {}", response.status());
        }

        let balances: HashMap<String, AddressBalance> = response
            .json()
            .await
            .map_err(reqwest::Error::without_url)?;
        Ok(usage_from_balances(balances))
    }
}

fn usage_from_balances(balances: HashMap<String, AddressBalance>) -> HashMap<String, bool> {
    balances
        .into_iter()
        .map(|(address, balance)| (address, balance.n_tx > 0))
        .collect()
}
