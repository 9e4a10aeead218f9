//! Gap-limited discovery of the next unused receive address.
//!
//! A scan walks the window `[start_index, start_index + gap_limit)` in
//! batches of `batch_size` consecutive indices. For each batch it:
//!
//! 1. derives the addresses and fingerprints them with the effective salt
//! 2. looks the fingerprints up in the [`UsageCache`]
//! 3. walks the batch in index order: a cached "unused" is re-confirmed
//!    (and corrected if the address has since been used), while runs of
//!    addresses the cache does not know go to the [`UsageOracle`] in one call
//! 4. stops at the first address confirmed or freshly reported unused
//! 5. writes every usage answer for the batch back to the cache
//!
//! If every provider fails on the first batch the scan fails. A later batch
//! whose providers fail is skipped (unless `fail_fast` is set), but a window
//! that contained a skipped batch never reports a definitive
//! [`ScanResult::Exhausted`].

use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info, warn};

use crate::{
    cache::UsageCache,
    config::ScannerConfig,
    deriver::{derive_batch, derive_master, DerivedAddress, MAX_NORMAL_INDEX},
    error::ScanError,
    fingerprint::{effective_salt, Fingerprint},
    oracle::UsageOracle,
};

/// Default scan window length.
pub const DEFAULT_GAP_LIMIT: u32 = 20;

/// Default number of indices per batch.
pub const DEFAULT_BATCH_SIZE: u32 = 20;

/// The lowest unused address in a scan window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FoundAddress {
    pub index: u32,
    pub address: String,
    pub public_key_hex: String,
    pub fingerprint: Fingerprint,
    pub salt: String,
}

/// Terminal value of a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanResult {
    /// An address confirmed unused
    Found(FoundAddress),
    /// Every index in the window is used; `gap_limit` is the number of
    /// indices examined
    Exhausted { start_index: u32, gap_limit: u32 },
}

/// Counters collected during one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    /// Batches derived and examined
    pub batches_scanned: u32,
    /// Addresses answered from the cache
    pub cache_hits: usize,
    /// Addresses sent to the oracle, confirmations included
    pub oracle_lookups: usize,
    /// Cached "unused" entries found to be used
    pub stale_corrections: usize,
    /// Batches for which every provider failed
    pub provider_failures: usize,
}

/// A scan's result together with how it was reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub result: ScanResult,
    pub stats: ScanStats,
}

/// One derived address and its cache key.
struct Candidate {
    derived: DerivedAddress,
    fingerprint: Fingerprint,
}

/// Discovers unused receive addresses using a shared cache and an oracle.
pub struct AddressScanner {
    cache: Arc<UsageCache>,
    oracle: UsageOracle,
    gap_limit: u32,
    batch_size: u32,
    fail_fast: bool,
}

impl AddressScanner {
    /// Scanner with the default gap limit and batch size.
    pub fn new(cache: Arc<UsageCache>, oracle: UsageOracle) -> Self {
        Self {
            cache,
            oracle,
            gap_limit: DEFAULT_GAP_LIMIT,
            batch_size: DEFAULT_BATCH_SIZE,
            fail_fast: false,
        }
    }

    /// Scanner configured from `config`, using the standard provider cascade.
    pub fn from_config(config: &ScannerConfig, cache: Arc<UsageCache>) -> anyhow::Result<Self> {
        config.validate()?;
        let oracle = UsageOracle::from_config(&config.providers)?;

        Ok(Self::new(cache, oracle)
            .with_gap_limit(config.gap_limit)
            .with_batch_size(config.batch_size)
            .with_fail_fast(config.fail_fast))
    }

    pub fn with_gap_limit(mut self, gap_limit: u32) -> Self {
        self.gap_limit = gap_limit.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Find the lowest unused address at or after `start_index`, failing with
    /// [`ScanError::GapLimitReached`] if the window is exhausted.
    pub async fn find_next_unused(
        &self,
        xpub: &str,
        start_index: u32,
        salt: Option<&str>,
    ) -> Result<FoundAddress, ScanError> {
        let report = self.scan(xpub, start_index, salt).await?;
        match report.result {
            ScanResult::Found(found) => Ok(found),
            ScanResult::Exhausted {
                start_index,
                gap_limit,
            } => Err(ScanError::GapLimitReached {
                start_index,
                gap_limit,
            }),
        }
    }

    /// Scan the window starting at `start_index`.
    pub async fn scan(
        &self,
        xpub: &str,
        start_index: u32,
        salt: Option<&str>,
    ) -> Result<ScanReport, ScanError> {
        let xpub = xpub.trim();
        let master = derive_master(xpub)?;
        let salt = effective_salt(xpub, salt);

        if start_index > MAX_NORMAL_INDEX {
            return Err(ScanError::DerivationOutOfRange(start_index));
        }
        let window_end = start_index
            .saturating_add(self.gap_limit)
            .min(MAX_NORMAL_INDEX + 1);

        let mut stats = ScanStats::default();
        let mut skipped: Option<ScanError> = None;
        let mut current = start_index;

        while current < window_end {
            let batch_end = current.saturating_add(self.batch_size).min(window_end);
            let first_batch = stats.batches_scanned == 0;
            stats.batches_scanned += 1;

            debug!(
                "Scanning indices {}..{} (batch {})",
                current, batch_end, stats.batches_scanned
            );

            let candidates: Vec<Candidate> = derive_batch(&master, current..batch_end)?
                .into_iter()
                .map(|derived| Candidate {
                    fingerprint: Fingerprint::new(&derived.address, &salt),
                    derived,
                })
                .collect();

            match self.scan_batch(&candidates, &mut stats).await {
                Ok(Some(position)) => {
                    let Candidate {
                        derived,
                        fingerprint,
                    } = &candidates[position];
                    info!(
                        "Found unused address at index {} after {} batches",
                        derived.index, stats.batches_scanned
                    );
                    return Ok(ScanReport {
                        result: ScanResult::Found(FoundAddress {
                            index: derived.index,
                            address: derived.address.clone(),
                            public_key_hex: derived.public_key_hex.clone(),
                            fingerprint: fingerprint.clone(),
                            salt,
                        }),
                        stats,
                    });
                }
                Ok(None) => {}
                Err(e @ ScanError::ProvidersExhausted { .. }) => {
                    stats.provider_failures += 1;
                    if first_batch || self.fail_fast {
                        return Err(e);
                    }
                    warn!("Skipping indices {}..{}: {}", current, batch_end, e);
                    skipped = Some(e);
                }
                Err(e) => return Err(e),
            }

            current = batch_end;
        }

        // A skipped batch might have held the free address
        if let Some(e) = skipped {
            return Err(e);
        }

        // Clipped at the top of the index space
        let examined = window_end - start_index;
        info!(
            "No unused address in {} indices from {}",
            examined, start_index
        );
        Ok(ScanReport {
            result: ScanResult::Exhausted {
                start_index,
                gap_limit: examined,
            },
            stats,
        })
    }

    /// Resolve usage for one batch and pick its lowest confirmed-unused
    /// candidate. Returns the candidate's position in `candidates`.
    ///
    /// Every answer known for the batch is recorded, even when resolving
    /// fails part way.
    async fn scan_batch(
        &self,
        candidates: &[Candidate],
        stats: &mut ScanStats,
    ) -> Result<Option<usize>, ScanError> {
        let cached = self
            .cache
            .lookup_many(candidates.iter().map(|c| &c.fingerprint));
        stats.cache_hits += cached.len();

        let mut usage: HashMap<Fingerprint, bool> = cached.clone();
        let outcome = self
            .resolve_batch(candidates, &cached, &mut usage, stats)
            .await;

        if let Err(e) = self.cache.record_many(&usage) {
            warn!("Failed to persist usage cache: {}", e);
        }

        outcome
    }

    /// Walk the batch in index order. A cached "unused" is confirmed as soon
    /// as everything below it is known; runs of unknown addresses go to the
    /// oracle in one call, stopping short of the next cached "unused".
    async fn resolve_batch(
        &self,
        candidates: &[Candidate],
        cached: &HashMap<Fingerprint, bool>,
        usage: &mut HashMap<Fingerprint, bool>,
        stats: &mut ScanStats,
    ) -> Result<Option<usize>, ScanError> {
        let mut position = 0;

        while position < candidates.len() {
            let candidate = &candidates[position];

            match cached.get(&candidate.fingerprint) {
                Some(true) => position += 1,
                Some(false) => {
                    if self.confirm_unused(candidate, usage, stats).await? {
                        return Ok(Some(position));
                    }
                    position += 1;
                }
                None => {
                    let run_end = candidates[position..]
                        .iter()
                        .position(|c| cached.get(&c.fingerprint) == Some(&false))
                        .map_or(candidates.len(), |offset| position + offset);
                    let run = &candidates[position..run_end];

                    let unknown: Vec<String> = run
                        .iter()
                        .filter(|c| !cached.contains_key(&c.fingerprint))
                        .map(|c| c.derived.address.clone())
                        .collect();

                    stats.oracle_lookups += unknown.len();
                    let answer = self.oracle.check_batch(&unknown).await?;
                    debug!(
                        "{} answered for {} of {} addresses",
                        answer.provider,
                        answer.usage.len(),
                        unknown.len()
                    );

                    for candidate in run {
                        if let Some(used) = answer.is_used(&candidate.derived.address) {
                            usage.insert(candidate.fingerprint.clone(), used);
                        }
                    }

                    // Only fresh answers in the run; its cached entries are "used"
                    if let Some(offset) = run
                        .iter()
                        .position(|c| answer.is_used(&c.derived.address) == Some(false))
                    {
                        return Ok(Some(position + offset));
                    }
                    position = run_end;
                }
            }
        }

        Ok(None)
    }

    /// Re-check a cached "unused" entry. Corrects it if the address has been
    /// used since.
    async fn confirm_unused(
        &self,
        candidate: &Candidate,
        usage: &mut HashMap<Fingerprint, bool>,
        stats: &mut ScanStats,
    ) -> Result<bool, ScanError> {
        stats.oracle_lookups += 1;
        match self.oracle.check_address(&candidate.derived.address).await? {
            Some(false) => Ok(true),
            Some(true) => {
                info!(
                    "Cached entry for index {} is stale, now used",
                    candidate.derived.index
                );
                stats.stale_corrections += 1;
                usage.insert(candidate.fingerprint.clone(), true);
                Ok(false)
            }
            None => {
                debug!(
                    "Could not confirm index {}, not returning it",
                    candidate.derived.index
                );
                Ok(false)
            }
        }
    }
}
