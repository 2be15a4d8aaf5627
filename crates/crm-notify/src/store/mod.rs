//! Persistent key-value store shared by every execution context.
//!
//! Values live in one table; every mutation is also appended to an ordered
//! change log tagged with the context that made it. The change log is what
//! the change feed in [`crate::context`] reads to broadcast changes to other
//! contexts.

pub mod migrations;
pub mod schema;
mod sqlite;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::event::{ContextId, StorageEvent};

pub use sqlite::SqliteStore;

/// A shared, synchronous key-value store with a change log.
///
/// Each mutating method is atomic across every process that opens the same
/// store.
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    /// Read the value under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Read the value under `key` together with the change log head, as
    /// of one instant.
    ///
    /// Every change recorded after the read has a seq above `head`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn snapshot(&self, key: &str) -> Result<KeySnapshot>;

    /// Write `value` under `key` and record the change as made by `origin`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written or the write would
    /// exceed the quota.
    fn set(&self, key: &str, value: &str, origin: &ContextId) -> Result<()>;

    /// Remove `key`. Returns `true` if a value was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn remove(&self, key: &str, origin: &ContextId) -> Result<bool>;

    /// Remove `key` only if its current value equals `expected`.
    ///
    /// Returns `true` if this call removed it. Of several concurrent callers
    /// with the same `expected`, at most one sees `true`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn compare_and_remove(&self, key: &str, expected: &str, origin: &ContextId) -> Result<bool>;

    /// Change records with `seq` greater than `after`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the change log cannot be read.
    fn changes_since(&self, after: i64, limit: usize) -> Result<Vec<ChangeRecord>>;

    /// Sequence number of the newest change record, 0 when there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the change log cannot be read.
    fn latest_seq(&self) -> Result<i64>;
}

/// One entry of the change log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// Position in the change log.
    pub seq: i64,
    /// The key that changed.
    pub key: String,
    /// Value before the change.
    pub old_value: Option<String>,
    /// Value after the change, `None` for a removal.
    pub new_value: Option<String>,
    /// Context that made the change.
    pub origin: ContextId,
    /// When the change was recorded.
    pub changed_at: DateTime<Utc>,
}

impl ChangeRecord {
    /// Convert into the event delivered to listeners.
    #[must_use]
    pub fn into_event(self) -> StorageEvent {
        StorageEvent {
            key: self.key,
            old_value: self.old_value,
            new_value: self.new_value,
            origin: self.origin,
            seq: Some(self.seq),
        }
    }
}

/// A key's value and the change log head, read together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySnapshot {
    /// Value under the key at the time of the read.
    pub value: Option<String>,
    /// Seq of the newest change record at the time of the read.
    pub head: i64,
}

/// Statistics about the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of keys currently held.
    pub key_count: i64,
    /// Number of change records retained.
    pub change_count: i64,
    /// Sequence number of the newest change record.
    pub latest_seq: i64,
    /// Bytes used by keys and values, as counted against the quota.
    pub used_bytes: u64,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
