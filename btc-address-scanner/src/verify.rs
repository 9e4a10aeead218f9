//! Wallet ownership check for a receive address.
//!
//! Pure derivation and comparison, no cache and no network. Indices are
//! compared in parallel and the lowest match wins regardless of which worker
//! finishes first.

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::{
    deriver::{derive, MasterKey, MAX_NORMAL_INDEX},
    error::ScanError,
    oracle::normalize_address,
};

/// Result of an ownership check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ownership {
    pub matched: bool,
    pub index: Option<u32>,
}

impl Ownership {
    fn at(index: Option<u32>) -> Self {
        Self {
            matched: index.is_some(),
            index,
        }
    }
}

/// Find the lowest index in `0..gap_limit` whose address is `target`.
pub fn verify_ownership(
    master: &MasterKey,
    target: &str,
    gap_limit: u32,
) -> Result<Ownership, ScanError> {
    let target = normalize_address(target);
    if target.is_empty() {
        return Err(ScanError::InvalidAddress("address must not be blank".to_string()));
    }

    let end = gap_limit.min(MAX_NORMAL_INDEX + 1);
    let index = (0..end)
        .into_par_iter()
        .filter_map(|index| match derive(master, index) {
            Ok(derived) if derived.address == target => Some(index),
            _ => None,
        })
        .min();

    debug!("Ownership check over {} indices: {:?}", end, index);
    Ok(Ownership::at(index))
}
