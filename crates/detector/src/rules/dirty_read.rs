//! Dirty read
//!
//! A point READ by one transaction returns the value of the other
//! transaction's latest WRITE on that key while the writer is still open.
//! Critical when the writer later rolls back: the value never existed.

use txnlab_core::{Anomaly, AnomalyType, EventKind, Severity, TxnName};

use super::{refs, RuleResult};
use crate::index::TraceIndex;

pub(super) fn evaluate(index: &TraceIndex<'_>) -> RuleResult {
    for key in index.sorted_keys() {
        for reader in TxnName::ALL {
            let writer = reader.other();
            for read in index.point_reads(reader, key) {
                let Some(observed) = read.observed_value() else {
                    continue;
                };
                let Some(write) = index
                    .writes(writer, key)
                    .into_iter()
                    .filter(|w| w.sequence_order < read.sequence_order)
                    .last()
                else {
                    continue;
                };
                if write.new_value != Some(observed) || !index.open_at(writer, read.sequence_order) {
                    continue;
                }

                let end = index.terminal(writer);
                let rolled_back = end.map_or(false, |e| e.kind == EventKind::Rollback);
                let severity = if rolled_back {
                    Severity::Critical
                } else {
                    Severity::High
                };
                let outcome = if rolled_back { "rolled back" } else { "committed later" };
                let description = format!(
                    "{} read {} = {} written by {} before {} ended; {} {}",
                    reader, key, observed, writer, writer, writer, outcome
                );
                return Ok(Some(Anomaly::new(
                    AnomalyType::DirtyRead,
                    severity,
                    [reader, writer],
                    refs([write, read].into_iter().chain(end)),
                    description,
                )));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing::{begin, build};
    use txnlab_core::{EventDraft, RecordKey, Run, ScenarioKind};

    fn a() -> RecordKey {
        RecordKey::account("A")
    }

    fn scenario(writer_end: EventDraft, read_after_end: bool) -> Run {
        let mut drafts = vec![
            begin(TxnName::T1),
            EventDraft::read(TxnName::T1, a(), Some(100)),
            EventDraft::write(TxnName::T1, a(), Some(100), 150),
            begin(TxnName::T2),
        ];
        let read = EventDraft::read(TxnName::T2, a(), Some(if read_after_end { 100 } else { 150 }));
        if read_after_end {
            drafts.push(writer_end);
            drafts.push(read);
        } else {
            drafts.push(read);
            drafts.push(writer_end);
        }
        drafts.push(EventDraft::commit(TxnName::T2));
        build(ScenarioKind::DirtyRead, None, drafts)
    }

    #[test]
    fn test_rolled_back_write_is_critical() {
        let run = scenario(EventDraft::rollback(TxnName::T1), false);
        let found = evaluate(&TraceIndex::new(&run)).unwrap().unwrap();
        assert_eq!(found.severity, Severity::Critical);
        assert_eq!(found.event_refs, vec![3, 5, 6]);
        assert_eq!(found.affected_transactions, vec![TxnName::T1, TxnName::T2]);
    }

    #[test]
    fn test_committed_write_is_high() {
        let run = scenario(EventDraft::commit(TxnName::T1), false);
        let found = evaluate(&TraceIndex::new(&run)).unwrap().unwrap();
        assert_eq!(found.severity, Severity::High);
    }

    #[test]
    fn test_read_after_writer_ended_is_clean() {
        let run = scenario(EventDraft::rollback(TxnName::T1), true);
        assert_eq!(evaluate(&TraceIndex::new(&run)).unwrap(), None);
    }
}
