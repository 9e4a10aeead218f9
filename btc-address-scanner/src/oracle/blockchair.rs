//! Blockchair multi-address dashboard.
//!
//! `GET /bitcoin/dashboards/addresses/addr1,addr2,...` returns one summary
//! per address under `data.addresses`.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

use super::UsageProvider;

/// Batch provider backed by Blockchair.
pub struct BlockchairProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct DashboardResponse {
    data: DashboardData,
}

#[derive(Debug, Deserialize)]
struct DashboardData {
    addresses: HashMap<String, AddressSummary>,
}

#[derive(Debug, Deserialize)]
struct AddressSummary {
    transaction_count: u64,
}

impl BlockchairProvider {
    /// Create a provider against `base_url` (e.g. `https://api.blockchair.com`).
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl UsageProvider for BlockchairProvider {
    fn name(&self) -> &str {
        "blockchair"
    }

    async fn check_batch(&self, addresses: &[String]) -> Result<HashMap<String, bool>> {
        let url = format!(
            "{}/bitcoin/dashboards/addresses/{}",
            self.base_url,
            addresses.join(",")
        );

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;

        if !response.status().is_success() {
            bail!("HTTP error: {}", response.status());
        }

        let dashboard: DashboardResponse = response
            .json()
            .await
            .map_err(reqwest::Error::without_url)?;
        Ok(usage_from_dashboard(dashboard))
    }
}

fn usage_from_dashboard(dashboard: DashboardResponse) -> HashMap<String, bool> {
    dashboard
        .data
        .addresses
        .into_iter()
        .map(|(address, summary)| (address, summary.transaction_count > 0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dashboard_response() {
        let body = r#"{
            "data": {
                "set": { "address_count": 2, "balance": 0 },
                "addresses": {
                    "bc1qused": { "type": "witness_v0_keyhash", "balance": 0, "transaction_count": 4 },
                    "bc1qfresh": { "type": null, "balance": 0, "transaction_count": 0 }
                },
                "transactions": []
            },
            "context": { "code": 200 }
        }"#;
        let dashboard: DashboardResponse = serde_json::from_str(body).unwrap();
        let usage = usage_from_dashboard(dashboard);

        assert_eq!(usage.get("bc1qused"), Some(&true));
        assert_eq!(usage.get("bc1qfresh"), Some(&false));
    }

    #[test]
    fn test_rejects_null_data() {
        let body = r#"{ "data": null, "context": { "code": 430, "error": "rate limited" } }"#;
        assert!(serde_json::from_str::<DashboardResponse>(body).is_err());
    }

    #[tokio::test]
    async fn test_server_error_fails_batch() {
        let base_url = crate::oracle::serve_canned("500 Internal Server Error", "{}").await;
        let provider = BlockchairProvider::new(reqwest::Client::new(), &base_url);

        let err = provider
            .check_batch(&["bc1qa".to_string(), "bc1qb".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}
