//! Trace index
//!
//! Rules ask the same few questions over and over: what happened on this
//! key, when did this transaction end, did anything commit in between. The
//! index answers them from one pass over the run. Run-level markers are
//! kept out of every per-key and per-transaction list.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use txnlab_core::{EventKind, RecordKey, Run, TraceEvent, TxnName};

type Positions = SmallVec<[usize; 8]>;

/// Lookup structure over one run's events
#[derive(Debug)]
pub struct TraceIndex<'a> {
    run: &'a Run,
    by_key: FxHashMap<&'a RecordKey, Positions>,
    by_txn: [Positions; 2],
    range_reads: [Positions; 2],
    terminal: [Option<usize>; 2],
}

fn slot(txn: TxnName) -> usize {
    match txn {
        TxnName::T1 => 0,
        TxnName::T2 => 1,
    }
}

impl<'a> TraceIndex<'a> {
    /// Index a run
    pub fn new(run: &'a Run) -> Self {
        let mut by_key: FxHashMap<&'a RecordKey, Positions> = FxHashMap::default();
        let mut by_txn: [Positions; 2] = Default::default();
        let mut range_reads: [Positions; 2] = Default::default();
        let mut terminal = [None, None];

        for (pos, event) in run.events().iter().enumerate() {
            let Some(txn) = event.transaction else {
                continue;
            };
            let s = slot(txn);
            by_txn[s].push(pos);
            if let Some(key) = &event.target_key {
                by_key.entry(key).or_default().push(pos);
            }
            if event.is_range_read() {
                range_reads[s].push(pos);
            }
            if event.kind.is_terminal() && terminal[s].is_none() {
                terminal[s] = Some(pos);
            }
        }

        Self {
            run,
            by_key,
            by_txn,
            range_reads,
            terminal,
        }
    }

    /// The indexed run
    pub fn run(&self) -> &'a Run {
        self.run
    }

    fn at<'s>(&'s self, positions: &'s [usize]) -> impl Iterator<Item = &'a TraceEvent> + 's {
        let events = self.run.events();
        positions.iter().map(move |&p| &events[p])
    }

    /// Transaction events on a key, in order
    pub fn on_key(&self, key: &RecordKey) -> impl Iterator<Item = &'a TraceEvent> + '_ {
        let positions: &[usize] = self.by_key.get(key).map_or(&[][..], |p| p.as_slice());
        self.at(positions)
    }

    /// Keys touched by either transaction
    pub fn keys(&self) -> impl Iterator<Item = &'a RecordKey> + '_ {
        self.by_key.keys().copied()
    }

    /// Keys touched by either transaction, sorted
    pub fn sorted_keys(&self) -> Vec<&'a RecordKey> {
        let mut keys: Vec<_> = self.keys().collect();
        keys.sort();
        keys
    }

    /// Events of one transaction, in order
    pub fn of(&self, txn: TxnName) -> impl Iterator<Item = &'a TraceEvent> + '_ {
        self.at(&self.by_txn[slot(txn)])
    }

    /// Range READs of one transaction, in order
    pub fn range_reads(&self, txn: TxnName) -> impl Iterator<Item = &'a TraceEvent> + '_ {
        self.at(&self.range_reads[slot(txn)])
    }

    /// Point READs of one transaction on one key
    pub fn point_reads(&self, txn: TxnName, key: &RecordKey) -> Vec<&'a TraceEvent> {
        self.on_key(key)
            .filter(|e| e.is_by(txn) && e.is_point_read())
            .collect()
    }

    /// WRITEs of one transaction on one key
    pub fn writes(&self, txn: TxnName, key: &RecordKey) -> Vec<&'a TraceEvent> {
        self.on_key(key)
            .filter(|e| e.is_by(txn) && e.kind == EventKind::Write)
            .collect()
    }

    /// All WRITEs of one transaction
    pub fn all_writes(&self, txn: TxnName) -> Vec<&'a TraceEvent> {
        self.of(txn).filter(|e| e.kind == EventKind::Write).collect()
    }

    /// COMMIT or ROLLBACK of a transaction
    pub fn terminal(&self, txn: TxnName) -> Option<&'a TraceEvent> {
        self.terminal[slot(txn)].map(|p| &self.run.events()[p])
    }

    /// COMMIT of a transaction, if it committed
    pub fn commit(&self, txn: TxnName) -> Option<&'a TraceEvent> {
        self.terminal(txn).filter(|e| e.kind == EventKind::Commit)
    }

    /// Whether `txn` committed strictly between two sequence numbers
    pub fn committed_between(&self, txn: TxnName, after: u64, before: u64) -> Option<&'a TraceEvent> {
        self.commit(txn)
            .filter(|c| c.sequence_order > after && c.sequence_order < before)
    }

    /// Whether `txn` was still open at a sequence number
    pub fn open_at(&self, txn: TxnName, sequence_order: u64) -> bool {
        let began = self
            .of(txn)
            .next()
            .map_or(false, |b| b.sequence_order < sequence_order);
        let ended = self
            .terminal(txn)
            .map_or(false, |t| t.sequence_order < sequence_order);
        began && !ended
    }
}
