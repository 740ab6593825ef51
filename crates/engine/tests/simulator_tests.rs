//! Simulator integration tests
//!
//! Runs every variant repeatedly and checks the shape of the traces it
//! produces: lifecycle order, terminal events, sequence numbering and the
//! trailing final-state markers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use txnlab_core::{
    notes, Error, EventKind, Interleaving, IsolationLevel, RangePredicate, RecordKey, Run,
    ScenarioKind, Store, StoreError, StoreResult, StoreSession, TxnName, TxnParams, TxnStatus,
};
use txnlab_engine::{EngineConfig, Simulator, TraceCollector};
use txnlab_storage::{MemorySession, MemoryStore};

fn simulator() -> Simulator {
    Simulator::in_memory(EngineConfig::default()).unwrap()
}

fn assert_well_formed(run: &Run) {
    for (i, event) in run.events().iter().enumerate() {
        assert_eq!(event.sequence_order, i as u64 + 1);
    }
    for txn in TxnName::ALL {
        let events: Vec<_> = run.events_of(txn).collect();
        assert_eq!(events.first().map(|e| e.kind), Some(EventKind::Begin), "{}", txn);
        let terminals: Vec<_> = events.iter().filter(|e| e.kind.is_terminal()).collect();
        assert_eq!(terminals.len(), 1, "{} must end exactly once", txn);
        assert!(events.last().unwrap().kind.is_terminal());
    }
    let first_marker = run
        .events()
        .iter()
        .position(|e| e.is_marker())
        .expect("final state markers");
    assert!(run.events()[first_marker..].iter().all(|e| e.is_marker()));
}

#[test]
fn test_every_variant_produces_well_formed_trace() {
    let sim = simulator();
    for kind in ScenarioKind::ALL {
        for interleaving in [Interleaving::Concurrent, Interleaving::Sequential] {
            let (t1, t2) = kind.default_params();
            let run = sim.run_with(kind, t1, t2, interleaving).unwrap();
            assert_eq!(run.variant(), kind);
            assert_eq!(run.interleaving(), interleaving);
            assert_well_formed(&run);
        }
    }
}

#[test]
fn test_deadlock_always_resolves_with_one_victim() {
    let sim = simulator();
    for _ in 0..20 {
        let run = sim.run_default(ScenarioKind::Deadlock).unwrap();
        let victims: Vec<_> = run
            .events()
            .iter()
            .filter(|e| e.kind == EventKind::Rollback && e.has_note(notes::DEADLOCK_VICTIM))
            .collect();
        assert_eq!(victims.len(), 1);
        let victim = run.victim().unwrap();
        let survivor = victim.other();
        assert_eq!(run.transaction(survivor).status, TxnStatus::Committed);
    }
}

#[test]
fn test_deadlock_victim_rolls_back_before_survivor_takes_its_row() {
    let sim = simulator();
    for _ in 0..50 {
        let run = sim.run_default(ScenarioKind::Deadlock).unwrap();
        let victim = run.victim().unwrap();
        let rollback = run.terminal_event(victim).unwrap().sequence_order;
        let survivor_locks: Vec<u64> = run
            .events_of(victim.other())
            .filter(|e| e.has_note(notes::FOR_UPDATE))
            .map(|e| e.sequence_order)
            .collect();
        assert_eq!(survivor_locks.len(), 2);
        assert!(
            rollback < survivor_locks[1],
            "victim rollback at {} after survivor lock at {}",
            rollback,
            survivor_locks[1]
        );
    }
}

#[test]
fn test_sequential_deadlock_has_no_victim() {
    let sim = simulator();
    let (t1, t2) = ScenarioKind::Deadlock.default_params();
    let run = sim
        .run_with(ScenarioKind::Deadlock, t1, t2, Interleaving::Sequential)
        .unwrap();
    assert_eq!(run.victim(), None);
    assert!(run.committed(TxnName::T1));
    assert!(run.committed(TxnName::T2));
}

#[test]
fn test_store_is_reset_between_runs() {
    let sim = simulator();
    let first = sim.run_default(ScenarioKind::LostUpdate).unwrap();
    let second = sim.run_default(ScenarioKind::LostUpdate).unwrap();
    let key = txnlab_core::RecordKey::account("A");
    assert_eq!(first.final_value(&key), second.final_value(&key));
    assert_ne!(first.id(), second.id());
}

#[test]
fn test_custom_amounts() {
    let sim = simulator();
    let a = txnlab_core::RecordKey::account("B");
    let run = sim
        .run(
            ScenarioKind::LostUpdate,
            TxnParams::new(5, [a.clone()]),
            TxnParams::new(7, [a.clone()]),
        )
        .unwrap();
    assert_eq!(run.final_value(&a), Some(207));
}

#[test]
fn test_shared_collector_across_threads() {
    let collector = Arc::new(TraceCollector::new());
    let handles: Vec<_> = [ScenarioKind::NonRepeatableRead, ScenarioKind::PhantomRead]
        .into_iter()
        .map(|kind| {
            let collector = Arc::clone(&collector);
            thread::spawn(move || {
                let sim =
                    Simulator::with_collector(
                        txnlab_storage::MemoryStore::new(),
                        EngineConfig::default(),
                        collector,
                    )
                    .unwrap();
                sim.run_default(kind).unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert_well_formed(&handle.join().unwrap());
    }
    assert_eq!(collector.open_runs(), 0);
}

/// Memory store whose sessions refuse the nth write across all sessions
struct RefusingStore {
    inner: MemoryStore,
    writes: Arc<AtomicUsize>,
    refuse_at: usize,
}

struct RefusingSession {
    inner: MemorySession,
    writes: Arc<AtomicUsize>,
    refuse_at: usize,
}

impl Store for RefusingStore {
    type Session = RefusingSession;

    fn connect(&self) -> StoreResult<RefusingSession> {
        Ok(RefusingSession {
            inner: self.inner.connect()?,
            writes: Arc::clone(&self.writes),
            refuse_at: self.refuse_at,
        })
    }

    fn reset(&self, seed: &[(RecordKey, i64)]) -> StoreResult<()> {
        self.inner.reset(seed)
    }

    fn committed_value(&self, key: &RecordKey) -> StoreResult<Option<i64>> {
        self.inner.committed_value(key)
    }
}

impl StoreSession for RefusingSession {
    fn begin(&mut self, isolation: IsolationLevel) -> StoreResult<()> {
        self.inner.begin(isolation)
    }

    fn read(&mut self, key: &RecordKey) -> StoreResult<Option<i64>> {
        self.inner.read(key)
    }

    fn read_range(&mut self, predicate: &RangePredicate) -> StoreResult<Vec<(RecordKey, i64)>> {
        self.inner.read_range(predicate)
    }

    fn lock_exclusive(&mut self, key: &RecordKey) -> StoreResult<Option<i64>> {
        self.inner.lock_exclusive(key)
    }

    fn write(&mut self, key: &RecordKey, value: i64) -> StoreResult<i64> {
        if self.writes.fetch_add(1, Ordering::SeqCst) + 1 == self.refuse_at {
            return Err(StoreError::SerializationFailure {
                key: key.clone(),
                reason: "refused for test".to_string(),
            });
        }
        self.inner.write(key, value)
    }

    fn insert(&mut self, key: &RecordKey, value: i64) -> StoreResult<()> {
        self.inner.insert(key, value)
    }

    fn delete(&mut self, key: &RecordKey) -> StoreResult<i64> {
        self.inner.delete(key)
    }

    fn commit(&mut self) -> StoreResult<()> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> StoreResult<()> {
        self.inner.rollback()
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }
}

#[test]
fn test_conflict_outside_deadlock_fails_the_run() {
    let writes = Arc::new(AtomicUsize::new(0));
    let store = RefusingStore {
        inner: MemoryStore::new(),
        writes: Arc::clone(&writes),
        // T1 writes first; T2's write waits for T1's commit
        refuse_at: 2,
    };
    let sim = Simulator::new(store, EngineConfig::default()).unwrap();

    let err = sim.run_default(ScenarioKind::LostUpdate).unwrap_err();
    match &err {
        Error::StoreConflict {
            transaction,
            operation,
            source,
        } => {
            assert_eq!(*transaction, TxnName::T2);
            assert_eq!(operation, "write accounts:A");
            assert!(matches!(source, StoreError::SerializationFailure { .. }));
        }
        other => panic!("expected StoreConflict, got {:?}", other),
    }
    assert_eq!(err.error_code(), "StoreConflict");
    // Not retried
    assert_eq!(writes.load(Ordering::SeqCst), 2);
    assert_eq!(sim.collector().open_runs(), 0);
    assert_eq!(sim.store().inner.active_transactions(), 0);
}
