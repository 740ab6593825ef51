//! Non-repeatable read
//!
//! One transaction reads a key twice and sees two values, and between the
//! reads the other transaction committed a write to that key. Changes made
//! by the reader itself do not count.

use txnlab_core::{Anomaly, AnomalyType, Severity, TxnName};

use super::{refs, value, RuleResult};
use crate::index::TraceIndex;

pub(super) fn evaluate(index: &TraceIndex<'_>) -> RuleResult {
    for key in index.sorted_keys() {
        for reader in TxnName::ALL {
            let writer = reader.other();
            let reads = index.point_reads(reader, key);
            for pair in reads.windows(2) {
                let (first, second) = (pair[0], pair[1]);
                if first.observed_value() == second.observed_value() {
                    continue;
                }
                let own_write_between = index.writes(reader, key).into_iter().any(|w| {
                    w.sequence_order > first.sequence_order && w.sequence_order < second.sequence_order
                });
                if own_write_between {
                    continue;
                }
                let Some(commit) =
                    index.committed_between(writer, first.sequence_order, second.sequence_order)
                else {
                    continue;
                };
                let Some(write) = index
                    .writes(writer, key)
                    .into_iter()
                    .filter(|w| w.sequence_order < commit.sequence_order)
                    .last()
                else {
                    continue;
                };

                let description = format!(
                    "{} read {} twice and got {} then {}; {} committed a write in between",
                    reader,
                    key,
                    value(first.observed_value()),
                    value(second.observed_value()),
                    writer
                );
                return Ok(Some(Anomaly::new(
                    AnomalyType::NonRepeatableRead,
                    Severity::Medium,
                    [reader, writer],
                    refs([first, write, commit, second]),
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
    use txnlab_core::{EventDraft, RecordKey, ScenarioKind};

    fn a() -> RecordKey {
        RecordKey::account("A")
    }

    #[test]
    fn test_intervening_commit() {
        let run = build(
            ScenarioKind::NonRepeatableRead,
            None,
            vec![
                begin(TxnName::T2),
                EventDraft::read(TxnName::T2, a(), Some(100)),
                begin(TxnName::T1),
                EventDraft::read(TxnName::T1, a(), Some(100)),
                EventDraft::write(TxnName::T1, a(), Some(100), 150),
                EventDraft::commit(TxnName::T1),
                EventDraft::read(TxnName::T2, a(), Some(150)),
                EventDraft::commit(TxnName::T2),
            ],
        );
        let found = evaluate(&TraceIndex::new(&run)).unwrap().unwrap();
        assert_eq!(found.affected_transactions, vec![TxnName::T1, TxnName::T2]);
        assert_eq!(found.event_refs, vec![2, 5, 6, 7]);
        assert_eq!(found.severity, Severity::Medium);
    }

    #[test]
    fn test_own_write_is_not_anomalous() {
        let run = build(
            ScenarioKind::NonRepeatableRead,
            None,
            vec![
                begin(TxnName::T2),
                EventDraft::read(TxnName::T2, a(), Some(100)),
                EventDraft::write(TxnName::T2, a(), Some(100), 40),
                EventDraft::read(TxnName::T2, a(), Some(40)),
                EventDraft::commit(TxnName::T2),
                begin(TxnName::T1),
                EventDraft::commit(TxnName::T1),
            ],
        );
        assert_eq!(evaluate(&TraceIndex::new(&run)).unwrap(), None);
    }

    #[test]
    fn test_stable_reads_are_clean() {
        let run = build(
            ScenarioKind::NonRepeatableRead,
            None,
            vec![
                begin(TxnName::T2),
                EventDraft::read(TxnName::T2, a(), Some(100)),
                begin(TxnName::T1),
                EventDraft::commit(TxnName::T1),
                EventDraft::read(TxnName::T2, a(), Some(100)),
                EventDraft::commit(TxnName::T2),
            ],
        );
        assert_eq!(evaluate(&TraceIndex::new(&run)).unwrap(), None);
    }
}
