//! Version chains for MVCC
//!
//! Every committed write pushes a `StoredVersion` onto the key's chain.
//! Versions are stored newest-first, so snapshot reads scan until they find
//! the first version at or below the snapshot. A deleted row is a tombstone
//! version with no value.

use std::collections::VecDeque;
use txnlab_core::Timestamp;

/// One committed version of a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredVersion {
    /// Commit version that produced this value
    pub version: u64,
    /// Row value, `None` for a tombstone
    pub value: Option<i64>,
    /// Commit time
    pub committed_at: Timestamp,
}

impl StoredVersion {
    /// Create a live version
    pub fn live(version: u64, value: i64) -> Self {
        Self {
            version,
            value: Some(value),
            committed_at: Timestamp::now(),
        }
    }

    /// Create a live or tombstone version
    pub fn new(version: u64, value: Option<i64>) -> Self {
        Self {
            version,
            value,
            committed_at: Timestamp::now(),
        }
    }

    /// Whether this version deletes the row
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// Version chain for one row, newest first
///
/// Uses VecDeque for O(1) push_front; rows in a scenario are updated
/// repeatedly across runs of one store.
#[derive(Debug, Clone)]
pub struct VersionChain {
    versions: VecDeque<StoredVersion>,
}

impl VersionChain {
    /// Create a chain with a single version
    pub fn new(first: StoredVersion) -> Self {
        let mut versions = VecDeque::with_capacity(4);
        versions.push_front(first);
        Self { versions }
    }

    /// Add a newer version
    #[inline]
    pub fn push(&mut self, version: StoredVersion) {
        debug_assert!(
            self.latest().map_or(true, |v| v.version < version.version),
            "versions must be pushed in increasing order"
        );
        self.versions.push_front(version);
    }

    /// Newest version at or before `max_version`
    pub fn get_at_version(&self, max_version: u64) -> Option<&StoredVersion> {
        self.versions.iter().find(|v| v.version <= max_version)
    }

    /// Newest version
    #[inline]
    pub fn latest(&self) -> Option<&StoredVersion> {
        self.versions.front()
    }

    /// Whether any version newer than `version` was committed
    pub fn changed_since(&self, version: u64) -> bool {
        self.latest().map_or(false, |v| v.version > version)
    }

    /// Remove versions older than `min_version`, keeping at least one
    pub fn gc(&mut self, min_version: u64) {
        while self.versions.len() > 1 {
            match self.versions.back() {
                Some(oldest) if oldest.version < min_version => {
                    self.versions.pop_back();
                }
                _ => break,
            }
        }
    }

    /// Number of versions stored
    pub fn version_count(&self) -> usize {
        self.versions.len()
    }

    /// All versions, newest first
    pub fn history(&self) -> impl Iterator<Item = &StoredVersion> {
        self.versions.iter()
    }
}
