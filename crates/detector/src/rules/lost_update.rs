//! Lost update
//!
//! Both transactions write the same key and commit. The later writer read
//! the key before the earlier writer committed and wrote it after, so its
//! write was computed from a value that no longer existed.

use txnlab_core::{Anomaly, AnomalyType, Severity, TxnName};

use super::{refs, value, RuleResult};
use crate::index::TraceIndex;

pub(super) fn evaluate(index: &TraceIndex<'_>) -> RuleResult {
    if index.commit(TxnName::T1).is_none() || index.commit(TxnName::T2).is_none() {
        return Ok(None);
    }
    for key in index.sorted_keys() {
        for first in TxnName::ALL {
            let second = first.other();
            let (Some(first_commit), Some(second_commit)) = (index.commit(first), index.commit(second))
            else {
                continue;
            };
            let Some(first_write) = index
                .writes(first, key)
                .into_iter()
                .filter(|w| w.sequence_order < first_commit.sequence_order)
                .last()
            else {
                continue;
            };
            let overwrite = index
                .writes(second, key)
                .into_iter()
                .find(|w| w.sequence_order > first_commit.sequence_order);
            let Some(overwrite) = overwrite else {
                continue;
            };
            // The read the overwrite was computed from is the latest one
            // before it; a re-read after the commit saw the committed value.
            let basis = index
                .point_reads(second, key)
                .into_iter()
                .filter(|r| r.sequence_order < overwrite.sequence_order)
                .last();
            let Some(stale_read) = basis.filter(|r| r.sequence_order < first_commit.sequence_order)
            else {
                continue;
            };
            if overwrite.sequence_order > second_commit.sequence_order {
                continue;
            }

            let description = format!(
                "{} read {} = {} before {} committed {}; {} then wrote {}, overwriting it",
                second,
                key,
                value(stale_read.observed_value()),
                first,
                value(first_write.new_value),
                second,
                value(overwrite.new_value)
            );
            return Ok(Some(Anomaly::new(
                AnomalyType::LostUpdate,
                Severity::High,
                [first, second],
                refs([stale_read, first_write, first_commit, overwrite, second_commit]),
                description,
            )));
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
    fn test_stale_read_then_overwrite() {
        let run = build(
            ScenarioKind::LostUpdate,
            None,
            vec![
                begin(TxnName::T1),
                EventDraft::read(TxnName::T1, a(), Some(100)),
                begin(TxnName::T2),
                EventDraft::read(TxnName::T2, a(), Some(100)),
                EventDraft::write(TxnName::T1, a(), Some(100), 150),
                EventDraft::commit(TxnName::T1),
                EventDraft::write(TxnName::T2, a(), Some(150), 80),
                EventDraft::commit(TxnName::T2),
                EventDraft::final_state(a(), Some(80)),
            ],
        );
        let found = evaluate(&TraceIndex::new(&run)).unwrap().unwrap();
        assert_eq!(found.event_refs, vec![4, 5, 6, 7, 8]);
        assert_eq!(found.severity, Severity::High);
        assert!(found.description.contains("80"));
    }

    #[test]
    fn test_read_after_commit_is_clean() {
        let run = build(
            ScenarioKind::LostUpdate,
            None,
            vec![
                begin(TxnName::T1),
                EventDraft::read(TxnName::T1, a(), Some(100)),
                EventDraft::write(TxnName::T1, a(), Some(100), 150),
                EventDraft::commit(TxnName::T1),
                begin(TxnName::T2),
                EventDraft::read(TxnName::T2, a(), Some(150)),
                EventDraft::write(TxnName::T2, a(), Some(150), 130),
                EventDraft::commit(TxnName::T2),
            ],
        );
        assert_eq!(evaluate(&TraceIndex::new(&run)).unwrap(), None);
    }

    #[test]
    fn test_reread_after_commit_is_clean() {
        let run = build(
            ScenarioKind::LostUpdate,
            None,
            vec![
                begin(TxnName::T1),
                begin(TxnName::T2),
                EventDraft::read(TxnName::T2, a(), Some(100)),
                EventDraft::read(TxnName::T1, a(), Some(100)),
                EventDraft::write(TxnName::T1, a(), Some(100), 150),
                EventDraft::commit(TxnName::T1),
                EventDraft::read(TxnName::T2, a(), Some(150)),
                EventDraft::write(TxnName::T2, a(), Some(150), 130),
                EventDraft::commit(TxnName::T2),
            ],
        );
        assert_eq!(evaluate(&TraceIndex::new(&run)).unwrap(), None);
    }

    #[test]
    fn test_rolled_back_overwrite_is_clean() {
        let run = build(
            ScenarioKind::LostUpdate,
            None,
            vec![
                begin(TxnName::T1),
                begin(TxnName::T2),
                EventDraft::read(TxnName::T2, a(), Some(100)),
                EventDraft::write(TxnName::T1, a(), Some(100), 150),
                EventDraft::commit(TxnName::T1),
                EventDraft::write(TxnName::T2, a(), Some(150), 80),
                EventDraft::rollback(TxnName::T2),
            ],
        );
        assert_eq!(evaluate(&TraceIndex::new(&run)).unwrap(), None);
    }
}
