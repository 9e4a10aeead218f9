//! Remote address-usage lookup with provider failover.
//!
//! An address is "used" once any confirmed or unconfirmed transaction
//! references it. Usage is asked of an ordered list of providers:
//!
//! 1. blockchain.info balance API (whole batch per call)
//! 2. Blockchair address dashboard (whole batch per call)
//! 3. mempool.space address API (one call per address, rate limited)
//!
//! A provider that errors, times out, returns a non-success status or an
//! unexpected body is abandoned for the rest of the batch and the next one
//! is asked the same question. A batch is always answered by exactly one
//! provider; only when every provider fails does the caller see
//! [`ScanError::ProvidersExhausted`].

mod blockchain_info;
mod blockchair;
mod mempool;

pub use blockchain_info::BlockchainInfoProvider;
pub use blockchair::BlockchairProvider;
pub use mempool::MempoolProvider;

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, error, warn};

use crate::{config::ProviderConfig, error::ScanError};

/// A remote source of address usage.
#[async_trait]
pub trait UsageProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Report usage for as many of `addresses` as the provider knows about.
    ///
    /// Any error abandons this provider for the batch.
    async fn check_batch(&self, addresses: &[String]) -> anyhow::Result<HashMap<String, bool>>;
}

/// One provider's answer for a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchUsage {
    /// Provider that answered
    pub provider: String,

    /// Usage per requested address, keyed as requested
    pub usage: HashMap<String, bool>,

    /// Requested addresses the provider said nothing about
    pub uncovered: Vec<String>,
}

impl BatchUsage {
    /// Usage of a requested address, `None` if it was not covered.
    pub fn is_used(&self, address: &str) -> Option<bool> {
        self.usage.get(address).copied()
    }
}

/// Ordered cascade of usage providers.
pub struct UsageOracle {
    providers: Vec<Box<dyn UsageProvider>>,
}

impl UsageOracle {
    /// Build an oracle that tries `providers` in the given order.
    pub fn new(providers: Vec<Box<dyn UsageProvider>>) -> Self {
        Self { providers }
    }

    /// The standard provider cascade sharing one HTTP client.
    pub fn from_config(config: &ProviderConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.request_timeout())
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self::new(vec![
            Box::new(BlockchainInfoProvider::new(
                client.clone(),
                &config.blockchain_info_url,
            )),
            Box::new(BlockchairProvider::new(client.clone(), &config.blockchair_url)),
            Box::new(MempoolProvider::new(
                client,
                &config.mempool_url,
                config.politeness_delay(),
            )),
        ]))
    }

    /// Names of the providers in priority order.
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Ask providers in order until one answers for the batch.
    pub async fn check_batch(&self, addresses: &[String]) -> Result<BatchUsage, ScanError> {
        if addresses.is_empty() {
            return Ok(BatchUsage::default());
        }

        for provider in &self.providers {
            match provider.check_batch(addresses).await {
                Ok(raw) => match cover(addresses, raw) {
                    Some((usage, uncovered)) => {
                        if !uncovered.is_empty() {
                            debug!(
                                "{} left {} of {} addresses uncovered",
                                provider.name(),
                                uncovered.len(),
                                addresses.len()
                            );
                        }
                        return Ok(BatchUsage {
                            provider: provider.name().to_string(),
                            usage,
                            uncovered,
                        });
                    }
                    None => warn!(
                        "{} answered for none of the {} requested addresses",
                        provider.name(),
                        addresses.len()
                    ),
                },
                Err(e) => warn!("{} failed: {:#}", provider.name(), e),
            }
        }

        error!(
            "All {} usage providers failed for a batch of {}",
            self.providers.len(),
            addresses.len()
        );
        Err(ScanError::ProvidersExhausted {
            attempted: self.providers.len(),
        })
    }

    /// Usage of a single address, `None` if the answering provider did not
    /// cover it.
    pub async fn check_address(&self, address: &str) -> Result<Option<bool>, ScanError> {
        let batch = self.check_batch(&[address.to_string()]).await?;
        Ok(batch.is_used(address))
    }
}

/// Canonical form of an address for comparison across providers.
///
/// Bech32 is case-insensitive and providers may echo it in either case;
/// base58 addresses are case-sensitive and only trimmed.
pub fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    let is_bech32 = trimmed
        .get(..3)
        .map_or(false, |hrp| hrp.eq_ignore_ascii_case("bc1"));
    if is_bech32 {
        trimmed.to_ascii_lowercase()
    } else {
        trimmed.to_string()
    }
}

/// Match a provider's raw answer against the requested addresses.
///
/// Returns `None` when the answer covers none of them.
fn cover(
    requested: &[String],
    raw: HashMap<String, bool>,
) -> Option<(HashMap<String, bool>, Vec<String>)> {
    let normalized: HashMap<String, bool> = raw
        .into_iter()
        .map(|(address, used)| (normalize_address(&address), used))
        .collect();

    let mut usage = HashMap::with_capacity(requested.len());
    let mut uncovered = Vec::new();
    for address in requested {
        match normalized.get(&normalize_address(address)) {
            Some(used) => {
                usage.insert(address.clone(), *used);
            }
            None => uncovered.push(address.clone()),
        }
    }

    if usage.is_empty() {
        None
    } else {
        Some((usage, uncovered))
    }
}

/// Serve `status` and `body` to every connection on an ephemeral local port.
/// Returns the base URL.
#[cfg(test)]
pub(crate) async fn serve_canned(status: &'static str, body: &'static str) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    format!("http://{}", addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Provider that answers from a fixed table or fails on demand.
    struct ScriptedProvider {
        name: &'static str,
        used: Vec<&'static str>,
        known: Option<Vec<&'static str>>,
        fail: bool,
        calls: Arc<Mutex<Vec<Vec<String>>>>,
    }

    impl ScriptedProvider {
        fn answering(name: &'static str, used: Vec<&'static str>) -> Self {
            Self {
                name,
                used,
                known: None,
                fail: false,
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn failing(name: &'static str) -> Self {
            Self {
                fail: true,
                ..Self::answering(name, vec![])
            }
        }
    }

    #[async_trait]
    impl UsageProvider for ScriptedProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn check_batch(&self, addresses: &[String]) -> anyhow::Result<HashMap<String, bool>> {
            self.calls.lock().unwrap().push(addresses.to_vec());
            if self.fail {
                anyhow::bail!("HTTP error: 503 Service Unavailable");
            }
            Ok(addresses
                .iter()
                .filter(|a| {
                    self.known
                        .as_ref()
                        .map_or(true, |known| known.contains(&a.as_str()))
                })
                .map(|a| (a.to_uppercase(), self.used.contains(&a.as_str())))
                .collect())
        }
    }

    fn batch(addresses: &[&str]) -> Vec<String> {
        addresses.iter().map(|a| a.to_string()).collect()
    }

    #[tokio::test]
    async fn test_first_provider_answers() {
        let second = ScriptedProvider::answering("second", vec![]);
        let second_calls = second.calls.clone();
        let oracle = UsageOracle::new(vec![
            Box::new(ScriptedProvider::answering("first", vec!["bc1qa"])),
            Box::new(second),
        ]);

        let result = oracle.check_batch(&batch(&["bc1qa", "bc1qb"])).await.unwrap();
        assert_eq!(result.provider, "first");
        assert_eq!(result.is_used("bc1qa"), Some(true));
        assert_eq!(result.is_used("bc1qb"), Some(false));
        assert!(second_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_falls_back_with_same_addresses() {
        let second = ScriptedProvider::answering("second", vec!["bc1qb"]);
        let second_calls = second.calls.clone();
        let oracle = UsageOracle::new(vec![
            Box::new(ScriptedProvider::failing("first")),
            Box::new(second),
        ]);

        let requested = batch(&["bc1qa", "bc1qb"]);
        let result = oracle.check_batch(&requested).await.unwrap();
        assert_eq!(result.provider, "second");
        assert_eq!(result.is_used("bc1qb"), Some(true));
        assert_eq!(*second_calls.lock().unwrap(), vec![requested]);
    }

    #[tokio::test]
    async fn test_all_providers_fail() {
        let oracle = UsageOracle::new(vec![
            Box::new(ScriptedProvider::failing("first")),
            Box::new(ScriptedProvider::failing("second")),
        ]);

        let err = oracle.check_batch(&batch(&["bc1qa"])).await.unwrap_err();
        assert!(matches!(err, ScanError::ProvidersExhausted { attempted: 2 }));
    }

    #[tokio::test]
    async fn test_partial_coverage_reported() {
        let mut partial = ScriptedProvider::answering("partial", vec![]);
        partial.known = Some(vec!["bc1qa"]);
        let oracle = UsageOracle::new(vec![Box::new(partial)]);

        let result = oracle.check_batch(&batch(&["bc1qa", "bc1qb"])).await.unwrap();
        assert_eq!(result.is_used("bc1qa"), Some(false));
        assert_eq!(result.is_used("bc1qb"), None);
        assert_eq!(result.uncovered, vec!["bc1qb".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_answer_falls_through() {
        let mut silent = ScriptedProvider::answering("silent", vec![]);
        silent.known = Some(vec![]);
        let oracle = UsageOracle::new(vec![
            Box::new(silent),
            Box::new(ScriptedProvider::answering("second", vec!["bc1qa"])),
        ]);

        let result = oracle.check_batch(&batch(&["bc1qa"])).await.unwrap();
        assert_eq!(result.provider, "second");
        assert_eq!(result.is_used("bc1qa"), Some(true));
    }

    #[tokio::test]
    async fn test_check_address() {
        let oracle = UsageOracle::new(vec![Box::new(ScriptedProvider::answering(
            "only",
            vec!["bc1qused"],
        ))]);
        assert_eq!(oracle.check_address("bc1qused").await.unwrap(), Some(true));
        assert_eq!(oracle.check_address("bc1qfree").await.unwrap(), Some(false));
    }

    #[tokio::test]
    async fn test_empty_batch_skips_providers() {
        let provider = ScriptedProvider::failing("first");
        let calls = provider.calls.clone();
        let oracle = UsageOracle::new(vec![Box::new(provider)]);

        assert!(oracle.check_batch(&[]).await.unwrap().usage.is_empty());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(
            normalize_address(" BC1QCR8TE4KR609GCAWUTMRZA0J4XV80JY8Z306FYU "),
            "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu"
        );
        assert_eq!(
            normalize_address("1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2"),
            "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2"
        );
    }

    #[tokio::test]
    async fn test_server_error_falls_back_to_next_provider() {
        let failing = serve_canned("503 Service Unavailable", "{}").await;
        let healthy = serve_canned(
            "200 OK",
            r#"{ "bc1qa": { "final_balance": 0, "n_tx": 2, "total_received": 700 } }"#,
        )
        .await;

        let client = reqwest::Client::new();
        let oracle = UsageOracle::new(vec![
            Box::new(BlockchainInfoProvider::new(client.clone(), &failing)),
            Box::new(BlockchainInfoProvider::new(client, &healthy)),
        ]);

        let result = oracle.check_batch(&batch(&["bc1qa"])).await.unwrap();
        assert_eq!(result.is_used("bc1qa"), Some(true));
    }

    #[test]
    fn test_standard_cascade_order() {
        let oracle = UsageOracle::from_config(&ProviderConfig::default()).unwrap();
        assert_eq!(
            oracle.provider_names(),
            vec!["blockchain.info", "blockchair", "mempool.space"]
        );
    }
}
