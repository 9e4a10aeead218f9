//! BTC Address Scanner
//!
//! Finds the next unused receive address of a watch-only BIP84 wallet given
//! only its account extended public key (`xpub` or `zpub`). This library
//! provides:
//!
//! - BIP84 external-chain derivation to native segwit (bech32) addresses
//! - A persistent usage cache keyed by salted address fingerprints
//! - A usage oracle that fails over across public blockchain APIs
//! - Gap-limited batched discovery with re-confirmation of cached answers
//! - Parallel ownership verification of an address against the wallet
//!
//! # Privacy
//!
//! The cache file never contains addresses, only `SHA256(address ++ salt)`.
//! Without the salt (by default derived from the xpub) a copy of the file
//! does not reveal which addresses belong to the wallet.

pub mod cache;
pub mod config;
pub mod deriver;
pub mod error;
pub mod fingerprint;
pub mod oracle;
pub mod scanner;
pub mod verify;

pub use cache::UsageCache;
pub use config::ScannerConfig;
pub use error::ScanError;
pub use oracle::{UsageOracle, UsageProvider};
pub use scanner::{AddressScanner, FoundAddress, ScanResult};
pub use verify::{verify_ownership, Ownership};
