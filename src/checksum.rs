//! Per-file content fingerprints.
//!
//! The store is the single owner of [`WatchedFile`] records for a session. It is what
//! separates a real content change from an editor touching mtime or rewriting identical
//! bytes.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;

/// 64-bit XXH3 digest of a file's bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Checksum(u64);

impl Checksum {
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(xxhash_rust::xxh3::xxh3_64(data))
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({self})")
    }
}

impl Serialize for Checksum {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A file tracked by the session, keyed by its root-relative path.
#[derive(Debug, Clone)]
pub struct WatchedFile {
    pub path: PathBuf,
    pub last_checksum: Checksum,
    pub last_seen_at: SystemTime,
}

/// What a fresh look at a file revealed compared to the stored fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fingerprint {
    /// Not tracked before; now tracked.
    New,
    /// Tracked, and the bytes differ.
    Changed,
    /// Tracked, and the bytes are identical (metadata-only touch).
    Unchanged,
    /// The file could not be read; any stored record was dropped.
    Vanished,
}

#[derive(Debug, Default)]
pub struct ChecksumStore {
    files: BTreeMap<PathBuf, WatchedFile>,
}

impl ChecksumStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a checksum for `path` computed elsewhere (e.g. during the baseline walk).
    pub fn insert(&mut self, path: PathBuf, checksum: Checksum) {
        self.files.insert(
            path.clone(),
            WatchedFile {
                path,
                last_checksum: checksum,
                last_seen_at: SystemTime::now(),
            },
        );
    }

    /// Update the stored fingerprint from an already computed checksum.
    /// `None` means the file could not be read.
    pub fn update(&mut self, rel: &Path, checksum: Option<Checksum>) -> Fingerprint {
        let Some(checksum) = checksum else {
            self.files.remove(rel);
            return Fingerprint::Vanished;
        };

        match self.files.get_mut(rel) {
            Some(entry) => {
                entry.last_seen_at = SystemTime::now();
                if entry.last_checksum == checksum {
                    Fingerprint::Unchanged
                } else {
                    entry.last_checksum = checksum;
                    Fingerprint::Changed
                }
            }
            None => {
                self.insert(rel.to_path_buf(), checksum);
                Fingerprint::New
            }
        }
    }

    pub fn remove(&mut self, rel: &Path) -> Option<WatchedFile> {
        self.files.remove(rel)
    }

    /// Tracked paths strictly beneath `dir` (used when a whole directory disappears).
    pub fn tracked_under(&self, dir: &Path) -> Vec<PathBuf> {
        self.files
            .keys()
            .filter(|p| p.starts_with(dir) && p.as_path() != dir)
            .cloned()
            .collect()
    }

    pub fn contains(&self, rel: &Path) -> bool {
        self.files.contains_key(rel)
    }

    pub fn get(&self, rel: &Path) -> Option<&WatchedFile> {
        self.files.get(rel)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Tracked files in path order.
    pub fn iter(&self) -> impl Iterator<Item = &WatchedFile> {
        self.files.values()
    }
}
