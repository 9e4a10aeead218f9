//! Persistent address-usage cache.
//!
//! Maps salted address fingerprints to the last usage answer seen for them.
//! The whole map lives in memory behind a read/write lock and is written to
//! a single JSON file after every mutation:
//!
//! ```text
//! {
//!   "<fingerprint hex>": { "used": true, "observedAt": "2026-01-01T00:00:00Z" },
//!   ...
//! }
//! ```
//!
//! Writes go to a temporary file next to the canonical one and are renamed
//! over it, so the file on disk is always either the previous complete
//! snapshot or the new one. A missing or unreadable file yields an empty
//! cache. Entries are never evicted.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

use crate::{error::CacheError, fingerprint::Fingerprint};

/// File name of the cache inside its directory.
pub const CACHE_FILE_NAME: &str = "address-cache.json";

/// Last known usage of one fingerprinted address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Whether the address had any transaction when observed
    pub used: bool,
    /// When the answer was obtained
    pub observed_at: DateTime<Utc>,
}

impl CacheEntry {
    fn observed_now(used: bool) -> Self {
        Self {
            used,
            observed_at: Utc::now(),
        }
    }
}

/// Entry counts, for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Total number of entries
    pub total: usize,
    /// Entries recorded as used
    pub used: usize,
    /// Entries recorded as unused
    pub unused: usize,
}

/// Shared, file-backed usage cache.
///
/// Readers only take the map's read lock. Mutations are serialized by a
/// separate writer lock that is held across the merge and the file write.
#[derive(Debug)]
pub struct UsageCache {
    /// Canonical cache file, `None` when running memory-only
    path: Option<PathBuf>,

    /// In-memory view of every recorded entry
    entries: RwLock<HashMap<Fingerprint, CacheEntry>>,

    /// Serializes merge + persist
    writer: Mutex<()>,
}

impl UsageCache {
    /// Open the cache stored in `dir`, creating the directory if needed.
    ///
    /// Never fails: if the directory cannot be created the cache runs in
    /// memory only, and an unreadable file is treated as empty.
    pub fn open(dir: &Path) -> Self {
        if let Err(e) = fs::create_dir_all(dir) {
            warn!(
                "Cannot create cache directory {:?} ({}), cache will be volatile",
                dir, e
            );
            return Self::in_memory();
        }

        let path = dir.join(CACHE_FILE_NAME);
        let entries = load_entries(&path);

        Self {
            path: Some(path),
            entries: RwLock::new(entries),
            writer: Mutex::new(()),
        }
    }

    /// A cache that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(HashMap::new()),
            writer: Mutex::new(()),
        }
    }

    /// Path of the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Known usage for each of the given fingerprints.
    ///
    /// Fingerprints with no entry are left out of the result: absence means
    /// "unknown", not "unused".
    pub fn lookup_many<'a, I>(&self, fingerprints: I) -> HashMap<Fingerprint, bool>
    where
        I: IntoIterator<Item = &'a Fingerprint>,
    {
        let entries = self.entries.read();
        fingerprints
            .into_iter()
            .filter_map(|fp| entries.get(fp).map(|entry| (fp.clone(), entry.used)))
            .collect()
    }

    /// Full entry for a fingerprint.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        self.entries.read().get(fingerprint).cloned()
    }

    /// Merge fresh usage answers and persist the whole map.
    ///
    /// The in-memory map is updated even if persisting fails.
    pub fn record_many(&self, results: &HashMap<Fingerprint, bool>) -> Result<(), CacheError> {
        if results.is_empty() {
            return Ok(());
        }

        let _writer = self.writer.lock();

        let snapshot = {
            let mut entries = self.entries.write();
            for (fingerprint, used) in results {
                entries.insert(fingerprint.clone(), CacheEntry::observed_now(*used));
            }

            // Let readers back in while we serialize
            let entries = RwLockWriteGuard::downgrade(entries);
            let ordered: BTreeMap<_, _> = entries.iter().collect();
            serde_json::to_string_pretty(&ordered)?
        };

        match &self.path {
            Some(path) => {
                write_atomically(path, snapshot.as_bytes())?;
                debug!("Persisted {} cache updates to {:?}", results.len(), path);
            }
            None => debug!("Recorded {} cache updates in memory", results.len()),
        }

        Ok(())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Entry counts by usage.
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read();
        let used = entries.values().filter(|e| e.used).count();
        CacheStats {
            total: entries.len(),
            used,
            unused: entries.len() - used,
        }
    }
}

/// Temporary file used while replacing `path`.
pub(crate) fn temp_path(path: &Path) -> PathBuf {
    path.with_extension("tmp")
}

fn load_entries(path: &Path) -> HashMap<Fingerprint, CacheEntry> {
    if !path.exists() {
        info!("No cache file at {:?}, starting empty", path);
        return HashMap::new();
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Failed to read cache {:?}: {}", path, e);
            return HashMap::new();
        }
    };

    match serde_json::from_str::<HashMap<Fingerprint, CacheEntry>>(&content) {
        Ok(entries) => {
            info!("Cache loaded: {} entries from {:?}", entries.len(), path);
            entries
        }
        Err(e) => {
            warn!("Ignoring corrupt cache file {:?}: {}", path, e);
            HashMap::new()
        }
    }
}

/// Write `contents` to a sibling temp file, flush it, then rename it over
/// `path`.
fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), CacheError> {
    let temp = temp_path(path);

    let mut file = fs::File::create(&temp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp, path)?;
    Ok(())
}
