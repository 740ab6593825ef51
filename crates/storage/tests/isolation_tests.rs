//! Isolation-level tests for MemoryStore
//!
//! Each section drives two sessions through one classic interleaving and
//! checks what the store lets through at each isolation level.

use proptest::prelude::*;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use txnlab_core::{IsolationLevel, RangePredicate, RecordKey, Store, StoreError, StoreSession};
use txnlab_storage::MemoryStore;

// ============================================================================
// Test Helpers
// ============================================================================

fn key(row: &str) -> RecordKey {
    RecordKey::account(row)
}

fn bank() -> MemoryStore {
    MemoryStore::seeded(&[(key("A"), 100), (key("B"), 200), (key("C"), 150)]).unwrap()
}

// ============================================================================
// SECTION 1: Write Skew
// ============================================================================

mod write_skew {
    use super::*;

    /// Both read A and B, each withdraws from a different row
    fn run(level: IsolationLevel) -> (Result<(), StoreError>, Result<(), StoreError>) {
        let store = bank();
        let mut t1 = store.connect().unwrap();
        let mut t2 = store.connect().unwrap();
        t1.begin(level).unwrap();
        t2.begin(level).unwrap();
        for s in [&mut t1, &mut t2] {
            s.read(&key("A")).unwrap();
            s.read(&key("B")).unwrap();
        }
        t1.write(&key("A"), -150).unwrap();
        t2.write(&key("B"), -50).unwrap();
        (t1.commit(), t2.commit())
    }

    #[test]
    fn test_repeatable_read_allows_write_skew() {
        let (r1, r2) = run(IsolationLevel::RepeatableRead);
        assert!(r1.is_ok());
        assert!(r2.is_ok());
    }

    #[test]
    fn test_serializable_rejects_second_commit() {
        let (r1, r2) = run(IsolationLevel::Serializable);
        assert!(r1.is_ok());
        assert!(matches!(r2, Err(StoreError::SerializationFailure { .. })));
    }
}

// ============================================================================
// SECTION 2: Phantoms
// ============================================================================

mod phantoms {
    use super::*;

    fn recount(level: IsolationLevel) -> (usize, usize, Result<(), StoreError>) {
        let store = bank();
        let predicate = RangePredicate::at_least("accounts", 100);
        let mut reader = store.connect().unwrap();
        let mut writer = store.connect().unwrap();
        reader.begin(level).unwrap();
        let first = reader.read_range(&predicate).unwrap().len();
        writer.begin(IsolationLevel::ReadCommitted).unwrap();
        writer.insert(&key("D"), 120).unwrap();
        writer.commit().unwrap();
        let second = reader.read_range(&predicate).unwrap().len();
        (first, second, reader.commit())
    }

    #[test]
    fn test_read_committed_sees_phantom() {
        let (first, second, commit) = recount(IsolationLevel::ReadCommitted);
        assert_eq!((first, second), (3, 4));
        assert!(commit.is_ok());
    }

    #[test]
    fn test_repeatable_read_hides_phantom() {
        let (first, second, _) = recount(IsolationLevel::RepeatableRead);
        assert_eq!(first, second);
    }

    #[test]
    fn test_serializable_fails_range_validation() {
        let (first, second, commit) = recount(IsolationLevel::Serializable);
        assert_eq!(first, second);
        assert!(matches!(commit, Err(StoreError::SerializationFailure { .. })));
    }
}

// ============================================================================
// SECTION 3: Lock Conflicts
// ============================================================================

mod lock_conflicts {
    use super::*;

    #[test]
    fn test_opposite_order_produces_one_deadlock_victim() {
        let store = bank();
        let barrier = Arc::new(Barrier::new(2));

        let spawn = |first: RecordKey, second: RecordKey| {
            let mut session = store.connect().unwrap();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                session.begin(IsolationLevel::ReadCommitted).unwrap();
                session.lock_exclusive(&first).unwrap();
                barrier.wait();
                match session.lock_exclusive(&second) {
                    Ok(_) => {
                        session.write(&second, 0).unwrap();
                        session.commit()
                    }
                    Err(e) => {
                        session.rollback().unwrap();
                        Err(e)
                    }
                }
            })
        };

        let h1 = spawn(key("A"), key("B"));
        let h2 = spawn(key("B"), key("A"));
        let outcomes = [h1.join().unwrap(), h2.join().unwrap()];

        let victims = outcomes
            .iter()
            .filter(|o| matches!(o, Err(StoreError::Deadlock(_))))
            .count();
        assert_eq!(victims, 1);
        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        assert_eq!(store.active_transactions(), 0);
    }

    #[test]
    fn test_lock_timeout_aborts_waiter() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(30));
        store.reset(&[(key("A"), 100)]).unwrap();
        let mut holder = store.connect().unwrap();
        let mut waiter = store.connect().unwrap();
        holder.begin(IsolationLevel::ReadCommitted).unwrap();
        holder.write(&key("A"), 1).unwrap();

        waiter.begin(IsolationLevel::ReadCommitted).unwrap();
        let err = waiter.write(&key("A"), 2).unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout { .. }));
        assert_eq!(waiter.commit(), Err(StoreError::TransactionAborted));
        assert!(!waiter.in_transaction());
    }

    #[test]
    fn test_reset_refused_while_transaction_open() {
        let store = bank();
        let mut s = store.connect().unwrap();
        s.begin(IsolationLevel::ReadCommitted).unwrap();
        assert_eq!(store.reset(&[]), Err(StoreError::TransactionActive));
        s.rollback().unwrap();
        assert!(store.reset(&[]).is_ok());
    }
}

// ============================================================================
// SECTION 4: Properties
// ============================================================================

proptest! {
    /// Serial read-modify-write transactions never lose a delta
    #[test]
    fn prop_serial_deltas_accumulate(deltas in proptest::collection::vec(-500i64..500, 1..20)) {
        let store = bank();
        let mut session = store.connect().unwrap();
        for delta in &deltas {
            session.begin(IsolationLevel::ReadCommitted).unwrap();
            let current = session.read(&key("A")).unwrap().unwrap();
            session.write(&key("A"), current + delta).unwrap();
            session.commit().unwrap();
        }
        let expected = 100 + deltas.iter().sum::<i64>();
        prop_assert_eq!(store.committed_value(&key("A")).unwrap(), Some(expected));
        prop_assert_eq!(store.version_count(&key("A")), deltas.len() + 1);
    }
}
