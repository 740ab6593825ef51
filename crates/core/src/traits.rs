//! Store abstraction
//!
//! The engine drives any transactional store through these two traits. A
//! `Store` hands out sessions; each transaction context owns exactly one
//! `StoreSession` and never shares it with the other context.
//!
//! Implementations must surface concurrency conflicts as the matching
//! [`StoreError`](crate::error::StoreError) variant (`Deadlock`,
//! `LockTimeout`, `SerializationFailure`) rather than blocking forever or
//! silently retrying.

use crate::error::StoreResult;
use crate::isolation::IsolationLevel;
use crate::scenario::RangePredicate;
use crate::types::RecordKey;

/// A shared transactional store
///
/// Thread safety: all methods must be safe to call concurrently from
/// multiple threads (requires Send + Sync).
pub trait Store: Send + Sync {
    /// Session type handed to one transaction context
    type Session: StoreSession;

    /// Open a session
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the store refuses connections.
    fn connect(&self) -> StoreResult<Self::Session>;

    /// Replace all committed data with `seed`
    ///
    /// Called before every run. Fails if a transaction is still open.
    fn reset(&self, seed: &[(RecordKey, i64)]) -> StoreResult<()>;

    /// Latest committed value of a key, outside any transaction
    fn committed_value(&self, key: &RecordKey) -> StoreResult<Option<i64>>;
}

/// One connection to a store, used by exactly one context at a time
///
/// All data operations require an open transaction.
pub trait StoreSession: Send {
    /// Open a transaction at an isolation level
    fn begin(&mut self, isolation: IsolationLevel) -> StoreResult<()>;

    /// Read one record
    fn read(&mut self, key: &RecordKey) -> StoreResult<Option<i64>>;

    /// Read every record matching a predicate, ordered by key
    fn read_range(&mut self, predicate: &RangePredicate) -> StoreResult<Vec<(RecordKey, i64)>>;

    /// Read one record and take its exclusive lock (`SELECT ... FOR UPDATE`)
    ///
    /// Blocks while another transaction holds the lock.
    fn lock_exclusive(&mut self, key: &RecordKey) -> StoreResult<Option<i64>>;

    /// Overwrite an existing record, returning the value replaced
    ///
    /// # Errors
    ///
    /// `NotFound` if the record does not exist.
    fn write(&mut self, key: &RecordKey, value: i64) -> StoreResult<i64>;

    /// Create a record
    ///
    /// # Errors
    ///
    /// `DuplicateKey` if the record already exists.
    fn insert(&mut self, key: &RecordKey, value: i64) -> StoreResult<()>;

    /// Remove a record, returning its last value
    fn delete(&mut self, key: &RecordKey) -> StoreResult<i64>;

    /// Commit the open transaction
    fn commit(&mut self) -> StoreResult<()>;

    /// Abort the open transaction and release its locks
    fn rollback(&mut self) -> StoreResult<()>;

    /// Whether a transaction is open
    fn in_transaction(&self) -> bool;
}
