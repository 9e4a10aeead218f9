//! Configuration for the address scanner.

use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{deriver::MAX_NORMAL_INDEX, error::ScanError};

/// Remote usage-provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Base URL of the blockchain.info balance API
    #[serde(default = "default_blockchain_info_url")]
    pub blockchain_info_url: String,

    /// Base URL of the Blockchair API
    #[serde(default = "default_blockchair_url")]
    pub blockchair_url: String,

    /// Base URL of the mempool.space API
    #[serde(default = "default_mempool_url")]
    pub mempool_url: String,

    /// Connect and read timeout for every provider call, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Delay between calls of the single-address provider, in milliseconds
    #[serde(default = "default_politeness_delay")]
    pub politeness_delay_ms: u64,

    /// User-Agent header sent to providers
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Scanner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Account-level extended public key (xpub or zpub)
    #[serde(default)]
    pub xpub: Option<String>,

    /// Fingerprint salt; derived from the xpub when absent
    #[serde(default)]
    pub salt: Option<String>,

    /// Number of indices a single request may examine
    #[serde(default = "default_gap_limit")]
    pub gap_limit: u32,

    /// Addresses derived, looked up and checked per round
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Directory holding the usage cache file
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Fail the request on the first batch whose providers all fail
    #[serde(default)]
    pub fail_fast: bool,

    /// Usage provider settings
    #[serde(default)]
    pub providers: ProviderConfig,
}

fn default_blockchain_info_url() -> String {
    "https://blockchain.info".to_string()
}

fn default_blockchair_url() -> String {
    "https://api.blockchair.com".to_string()
}

fn default_mempool_url() -> String {
    "https://mempool.space".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_politeness_delay() -> u64 {
    250
}

fn default_user_agent() -> String {
    format!("btc-address-scanner/{}", env!("CARGO_PKG_VERSION"))
}

fn default_gap_limit() -> u32 {
    20
}

fn default_batch_size() -> u32 {
    20
}

fn default_cache_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".btc-address-scanner"))
        .unwrap_or_else(|| PathBuf::from("data"))
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            blockchain_info_url: default_blockchain_info_url(),
            blockchair_url: default_blockchair_url(),
            mempool_url: default_mempool_url(),
            request_timeout_secs: default_request_timeout(),
            politeness_delay_ms: default_politeness_delay(),
            user_agent: default_user_agent(),
        }
    }
}

impl ProviderConfig {
    /// Per-call timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Pause between single-address calls.
    pub fn politeness_delay(&self) -> Duration {
        Duration::from_millis(self.politeness_delay_ms)
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            xpub: None,
            salt: None,
            gap_limit: default_gap_limit(),
            batch_size: default_batch_size(),
            cache_dir: default_cache_dir(),
            fail_fast: false,
            providers: ProviderConfig::default(),
        }
    }
}

impl ScannerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ScannerConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.gap_limit == 0 {
            return Err(ScanError::Config("gap_limit must be at least 1".into()));
        }
        if self.gap_limit > MAX_NORMAL_INDEX {
            return Err(ScanError::Config(format!(
                "gap_limit must not exceed {}",
                MAX_NORMAL_INDEX
            )));
        }
        if self.batch_size == 0 {
            return Err(ScanError::Config("batch_size must be at least 1".into()));
        }

        if let Some(xpub) = &self.xpub {
            let xpub = xpub.trim();
            if !xpub.is_empty() && !xpub.starts_with("xpub") && !xpub.starts_with("zpub") {
                return Err(ScanError::Config("xpub must start with 'xpub' or 'zpub'".into()));
            }
        }

        let providers = &self.providers;
        if providers.request_timeout_secs == 0 {
            return Err(ScanError::Config("request_timeout_secs must be at least 1".into()));
        }
        for (name, url) in [
            ("blockchain_info_url", &providers.blockchain_info_url),
            ("blockchair_url", &providers.blockchair_url),
            ("mempool_url", &providers.mempool_url),
        ] {
            if url.trim().is_empty() {
                return Err(ScanError::Config(format!("{} must not be empty", name)));
            }
        }

        if self.batch_size > self.gap_limit {
            tracing::debug!(
                "batch_size {} exceeds gap_limit {}, batches will be clipped",
                self.batch_size,
                self.gap_limit
            );
        }

        Ok(())
    }

    /// The configured xpub, if it is present and non-blank.
    pub fn xpub(&self) -> Option<&str> {
        self.xpub
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}
