//! Error types for address discovery.

use displaydoc::Display;
use thiserror::Error;

/// Errors surfaced by discovery and verification requests.
#[derive(Debug, Display, Error)]
pub enum ScanError {
    /// Invalid extended public key: {0}
    InvalidKeyFormat(String),

    /// Invalid address: {0}
    InvalidAddress(String),

    /// Derivation index {0} is outside the non-hardened range
    DerivationOutOfRange(u32),

    /// All {attempted} usage providers failed
    ProvidersExhausted {
        /// Number of providers tried before giving up
        attempted: usize,
    },

    /// No unused address within {gap_limit} indices of {start_index}
    GapLimitReached {
        /// First index of the scan window
        start_index: u32,
        /// Length of the scan window
        gap_limit: u32,
    },

    /// Invalid configuration: {0}
    Config(String),
}

impl ScanError {
    /// Whether the error is the caller's fault rather than a system failure.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ScanError::InvalidKeyFormat(_) | ScanError::InvalidAddress(_) | ScanError::Config(_)
        )
    }
}

/// Errors from the usage cache's backing file.
#[derive(Debug, Display, Error)]
pub enum CacheError {
    /// Cache I/O failed: {0}
    Io(#[from] std::io::Error),

    /// Cache serialization failed: {0}
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_uses_doc_comments() {
        let err = ScanError::GapLimitReached {
            start_index: 40,
            gap_limit: 20,
        };
        assert_eq!(err.to_string(), "No unused address within 20 indices of 40");

        let err = ScanError::ProvidersExhausted { attempted: 3 };
        assert_eq!(err.to_string(), "All 3 usage providers failed");
    }

    #[test]
    fn test_user_errors() {
        assert!(ScanError::InvalidKeyFormat("bad".into()).is_user_error());
        assert!(!ScanError::ProvidersExhausted { attempted: 1 }.is_user_error());
        assert!(!ScanError::DerivationOutOfRange(u32::MAX).is_user_error());
    }
}
