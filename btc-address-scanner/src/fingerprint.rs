//! Salted address fingerprints.
//!
//! The usage cache is keyed by `hex(SHA256(address ++ salt))` so that a copy
//! of the cache file does not reveal wallet addresses to anyone lacking the
//! salt. When no salt is supplied, `hex(SHA256(xpub))` is used.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex-encoded salted hash of an address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint an address under the given salt.
    pub fn new(address: &str, salt: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(address.as_bytes());
        hasher.update(salt.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// The fingerprint as lowercase hex.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Default salt for a wallet: `hex(SHA256(xpub))`.
pub fn salt_from_xpub(xpub: &str) -> String {
    hex::encode(Sha256::digest(xpub.as_bytes()))
}

/// The caller's salt, or the xpub-derived default when it is absent or blank.
pub fn effective_salt(xpub: &str, salt: Option<&str>) -> String {
    match salt {
        Some(s) if !s.trim().is_empty() => s.to_string(),
        _ => salt_from_xpub(xpub),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = Fingerprint::new("bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu", "salt");
        let b = Fingerprint::new("bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu", "salt");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_matches_concatenation() {
        // Hashing address then salt is the same as hashing the concatenation
        let fp = Fingerprint::new("abc", "def");
        assert_eq!(fp.as_str(), hex::encode(Sha256::digest(b"abcdef")));
    }

    #[test]
    fn test_distinct_inputs_distinct_fingerprints() {
        let inputs = [
            ("bc1qaddr0", "salt-a"),
            ("bc1qaddr0", "salt-b"),
            ("bc1qaddr1", "salt-a"),
            ("bc1qaddr1", "salt-b"),
        ];
        let fps: std::collections::HashSet<_> = inputs
            .iter()
            .map(|(addr, salt)| Fingerprint::new(addr, salt))
            .collect();
        assert_eq!(fps.len(), inputs.len());
    }

    #[test]
    fn test_effective_salt() {
        let xpub = "xpub-test";
        assert_eq!(effective_salt(xpub, Some("custom")), "custom");
        assert_eq!(effective_salt(xpub, None), salt_from_xpub(xpub));
        assert_eq!(effective_salt(xpub, Some("   ")), salt_from_xpub(xpub));
        assert_eq!(salt_from_xpub(xpub).len(), 64);
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let fp = Fingerprint::new("abc", "def");
        assert_eq!(
            serde_json::to_string(&fp).unwrap(),
            format!("\"{}\"", fp.as_str())
        );

        let back: Fingerprint = serde_json::from_str(&format!("\"{}\"", fp)).unwrap();
        assert_eq!(back, fp);
    }
}
