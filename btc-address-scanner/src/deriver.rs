//! BIP84 receive-address derivation from an extended public key.
//!
//! Accepts both `xpub` and `zpub` encodings of an account-level key
//! (`m/84'/0'/0'`). A `zpub` differs from the matching `xpub` only in its
//! four version bytes, so it is normalized by rewriting those bytes before
//! parsing; the key material is untouched.
//!
//! Everything here is pure and free of shared state, so a [`MasterKey`] can
//! be used from many threads at once.

use bitcoin::{
    base58,
    bip32::{ChildNumber, Xpub},
    secp256k1::{Secp256k1, VerifyOnly},
    Address, CompressedPublicKey, Network,
};
use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::ScanError;

/// Version bytes of a mainnet `xpub`.
const XPUB_VERSION: [u8; 4] = [0x04, 0x88, 0xB2, 0x1E];

/// Version bytes of a mainnet `zpub` (BIP84 / native segwit).
const ZPUB_VERSION: [u8; 4] = [0x04, 0xB2, 0x47, 0x46];

/// Serialized extended key length (without the base58 checksum).
const EXTENDED_KEY_LEN: usize = 78;

/// Largest index usable for non-hardened derivation.
pub const MAX_NORMAL_INDEX: u32 = (1 << 31) - 1;

/// Addresses are always derived for mainnet.
const NETWORK: Network = Network::Bitcoin;

/// The wallet's external receiving chain (`m/84'/0'/0'/0`).
///
/// Built once per request from the account xpub and dropped with it. This is
/// public key material only and is never persisted.
pub struct MasterKey {
    external_chain: Xpub,
    secp: Secp256k1<VerifyOnly>,
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("depth", &self.external_chain.depth)
            .field("fingerprint", &self.external_chain.parent_fingerprint)
            .finish()
    }
}

/// A receive address at a given index of the external chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedAddress {
    /// Child index under the external chain
    pub index: u32,
    /// Bech32 (P2WPKH) address
    pub address: String,
    /// Compressed public key (hex)
    pub public_key_hex: String,
}

/// Parse an account-level `xpub`/`zpub` and step down to its external chain.
pub fn derive_master(key: &str) -> Result<MasterKey, ScanError> {
    let key = key.trim();
    let prefix = key.get(..4).unwrap_or("");
    if prefix != "xpub" && prefix != "zpub" {
        return Err(ScanError::InvalidKeyFormat(format!(
            "expected an xpub or zpub, got prefix '{}'",
            prefix
        )));
    }

    let mut data = base58::decode_check(key)
        .map_err(|e| ScanError::InvalidKeyFormat(format!("base58 decoding failed: {}", e)))?;

    if data.len() != EXTENDED_KEY_LEN {
        return Err(ScanError::InvalidKeyFormat(format!(
            "expected {} bytes, got {}",
            EXTENDED_KEY_LEN,
            data.len()
        )));
    }

    match <[u8; 4]>::try_from(&data[..4]) {
        Ok(XPUB_VERSION) => {}
        Ok(ZPUB_VERSION) => data[..4].copy_from_slice(&XPUB_VERSION),
        _ => {
            return Err(ScanError::InvalidKeyFormat(
                "version bytes do not denote a mainnet public key".to_string(),
            ))
        }
    }

    let account = Xpub::decode(&data)
        .map_err(|e| ScanError::InvalidKeyFormat(format!("not a valid public key: {}", e)))?;

    let secp = Secp256k1::verification_only();
    let external_chain = account
        .ckd_pub(&secp, ChildNumber::Normal { index: 0 })
        .map_err(|e| ScanError::InvalidKeyFormat(format!("cannot derive external chain: {}", e)))?;

    Ok(MasterKey {
        external_chain,
        secp,
    })
}

/// Derive the receive address at `index`.
pub fn derive(master: &MasterKey, index: u32) -> Result<DerivedAddress, ScanError> {
    let child_number =
        ChildNumber::from_normal_idx(index).map_err(|_| ScanError::DerivationOutOfRange(index))?;

    let child = master
        .external_chain
        .ckd_pub(&master.secp, child_number)
        .map_err(|_| ScanError::DerivationOutOfRange(index))?;

    let public_key = CompressedPublicKey(child.public_key);
    let address = Address::p2wpkh(&public_key, NETWORK);

    Ok(DerivedAddress {
        index,
        address: address.to_string(),
        public_key_hex: hex::encode(child.public_key.serialize()),
    })
}

/// Derive every address in `range`, in index order.
pub fn derive_batch(master: &MasterKey, range: Range<u32>) -> Result<Vec<DerivedAddress>, ScanError> {
    range.map(|index| derive(master, index)).collect()
}

/// Rewrite a `zpub` into the equivalent `xpub` string. Any other input is
/// returned unchanged.
pub fn zpub_to_xpub(key: &str) -> String {
    let key = key.trim();
    match base58::decode_check(key) {
        Ok(mut data) if data.len() == EXTENDED_KEY_LEN && data[..4] == ZPUB_VERSION => {
            data[..4].copy_from_slice(&XPUB_VERSION);
            base58::encode_check(&data)
        }
        _ => key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // BIP84 test vector, account 0 of "abandon ... about"
    const ZPUB: &str = "zpub6rFR7y4Q2AijBEqTUquhVz398htDFrtymD9xYYfG1m4wAcvPhXNfE3EfH1r1ADqtfSdVCToUG868RvUUkgDKf31mGDtKsAYz2oz2AGutZYs";

    #[test]
    fn test_bip84_vector() {
        let master = derive_master(ZPUB).unwrap();

        let first = derive(&master, 0).unwrap();
        assert_eq!(first.address, "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu");
        assert_eq!(
            first.public_key_hex,
            "0330d54fd0dd420a6e5f8d3624f5f3482cae350f79d5f0753bf5beef9c2d91af3c"
        );

        let second = derive(&master, 1).unwrap();
        assert_eq!(second.address, "bc1qnjg0jd8228aq7egyzacy8cys3knf9xvrerkf9g");
    }

    #[test]
    fn test_xpub_and_zpub_agree() {
        let xpub = zpub_to_xpub(ZPUB);
        assert!(xpub.starts_with("xpub"));

        let from_z = derive_master(ZPUB).unwrap();
        let from_x = derive_master(&xpub).unwrap();
        for index in [0, 1, 7, 1000] {
            assert_eq!(derive(&from_z, index).unwrap(), derive(&from_x, index).unwrap());
        }
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let master = derive_master(ZPUB).unwrap();
        let a = derive(&master, 42).unwrap();
        let b = derive(&master, 42).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.index, 42);
    }

    #[test]
    fn test_batch_preserves_order() {
        let master = derive_master(ZPUB).unwrap();
        let batch = derive_batch(&master, 5..9).unwrap();
        let indices: Vec<_> = batch.iter().map(|d| d.index).collect();
        assert_eq!(indices, vec![5, 6, 7, 8]);
    }

    #[test]
    fn test_out_of_range_index() {
        let master = derive_master(ZPUB).unwrap();
        assert!(derive(&master, MAX_NORMAL_INDEX).is_ok());
        assert!(matches!(
            derive(&master, MAX_NORMAL_INDEX + 1),
            Err(ScanError::DerivationOutOfRange(_))
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            derive_master("not-a-key"),
            Err(ScanError::InvalidKeyFormat(_))
        ));
        assert!(matches!(
            derive_master("xpubnotbase58checked"),
            Err(ScanError::InvalidKeyFormat(_))
        ));
    }

    #[test]
    fn test_rejects_corrupted_checksum() {
        let mut corrupted = ZPUB.to_string();
        corrupted.pop();
        corrupted.push('t');
        assert!(matches!(
            derive_master(&corrupted),
            Err(ScanError::InvalidKeyFormat(_))
        ));
    }

    #[test]
    fn test_zpub_to_xpub_passthrough() {
        assert_eq!(zpub_to_xpub("xpub-anything"), "xpub-anything");
    }
}
